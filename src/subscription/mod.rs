//! Subscription streams: the registry of live cancel handles and the task that pumps
//! stream messages into a context.

pub mod pump;
pub mod registry;

pub use registry::{CancelHandle, SubscriptionRegistry};
