//! Querykeep: Query Context Lifecycle Management
//!
//! Executes a query fetch, keeps its result live through subscription streams, caches the
//! merged result with its loading and error state, reference-counts the consumers of each
//! query identity, and evicts queries nobody has used for a grace period.

pub mod accumulator;
pub mod api;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod subscription;
pub mod transport;
pub mod types;
pub mod usage;

pub use api::{LifecycleBuilder, QueryLifecycle, UsageGuard};
pub use context::{QueryContext, QueryStatus};
pub use types::{Credentials, QueryIdentity};
