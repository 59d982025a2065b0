//! Core identifiers shared by every component.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Opaque caller-supplied name of one logical query slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueryIdentity(Arc<str>);

impl QueryIdentity {
    pub fn new(identity: impl Into<String>) -> Result<Self, ConfigurationError> {
        let identity = identity.into();
        if identity.trim().is_empty() {
            return Err(ConfigurationError::InvalidIdentity(identity));
        }
        Ok(Self(Arc::from(identity)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for QueryIdentity {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for QueryIdentity {
    type Error = ConfigurationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueryIdentity> for String {
    fn from(identity: QueryIdentity) -> Self {
        identity.0.to_string()
    }
}

/// Comparison key over a compiled query: BLAKE3 of the wire representation.
///
/// Two shapes are equivalent iff their wire bytes are identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeFingerprint([u8; 32]);

impl ShapeFingerprint {
    pub fn of(wire_query: &[u8]) -> Self {
        Self(*blake3::hash(wire_query).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ShapeFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ShapeFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        write!(f, "ShapeFingerprint({})", &hex::encode(self.0)[..12])
    }
}

/// Monotonic tag of one fetch execution.
///
/// Drawn from a process-wide counter so an execution that outlives an eviction can never
/// collide with the epoch of a freshly created context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionEpoch(u64);

impl ExecutionEpoch {
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ExecutionEpoch(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credentials handed through to the transport untouched.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            claims: BTreeMap::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("claims", &self.claims.keys().collect::<Vec<_>>())
            .finish()
    }
}
