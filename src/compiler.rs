//! Query compiler boundary.
//!
//! Turns a caller's declarative query definition into the wire query, the one-shot fetch
//! plan, and the subscription descriptors that keep the result live.

use crate::error::CompileError;
use crate::types::{QueryIdentity, ShapeFingerprint};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Executable one-shot request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchPlan {
    pub operation: String,
    #[serde(default)]
    pub variables: Value,
}

/// One live stream to open after the fetch succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDescriptor {
    /// Stable name, used in logs and in subscription errors
    pub name: String,
    pub operation: String,
    #[serde(default)]
    pub variables: Value,
}

/// Output of a compile step.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Byte-identical for structurally equal definitions
    pub wire_query: String,
    pub fetch_plan: FetchPlan,
    pub subscriptions: Vec<SubscriptionDescriptor>,
}

impl CompiledQuery {
    pub fn fingerprint(&self) -> ShapeFingerprint {
        ShapeFingerprint::of(self.wire_query.as_bytes())
    }
}

/// Compiles query definitions of type `D`.
pub trait QueryCompiler<D>: Send + Sync {
    fn compile(
        &self,
        definition: &D,
        identity: &QueryIdentity,
    ) -> Result<CompiledQuery, CompileError>;
}

impl<D, F> QueryCompiler<D> for F
where
    F: Fn(&D, &QueryIdentity) -> Result<CompiledQuery, CompileError> + Send + Sync,
{
    fn compile(
        &self,
        definition: &D,
        identity: &QueryIdentity,
    ) -> Result<CompiledQuery, CompileError> {
        self(definition, identity)
    }
}
