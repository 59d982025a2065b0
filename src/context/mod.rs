//! Query context: the cached, merged result of one query identity and its loading state.

pub mod events;
pub mod pending;
pub mod store;

pub use events::{ContextBus, ContextEvent, ContextEventKind};
pub use pending::PendingHandle;
pub use store::QueryContextStore;

use crate::error::{FetchError, SubscriptionError};
use crate::types::{ExecutionEpoch, ShapeFingerprint};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Derived lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No execution was ever issued
    Idle,
    /// A fetch or its subscription setup is outstanding
    Fetching,
    Resolved,
    Failed,
}

/// Snapshot of one query slot.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Last merged aggregate, `{}` until the first fetch succeeds
    pub results: Value,
    /// False until the first fetch settles, success or failure
    pub has_resolved: bool,
    pub query_error: Option<FetchError>,
    pub subscription_error: Option<SubscriptionError>,
    pub in_flight: Option<PendingHandle>,
    pub shape_fingerprint: Option<ShapeFingerprint>,
    /// Execution whose results and messages may still be merged
    pub epoch: Option<ExecutionEpoch>,
    pub updated_at: DateTime<Utc>,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self {
            results: Value::Object(Map::new()),
            has_resolved: false,
            query_error: None,
            subscription_error: None,
            in_flight: None,
            shape_fingerprint: None,
            epoch: None,
            updated_at: Utc::now(),
        }
    }
}

impl QueryContext {
    pub fn status(&self) -> QueryStatus {
        if self.in_flight.is_some() {
            QueryStatus::Fetching
        } else if self.query_error.is_some() {
            QueryStatus::Failed
        } else if self.has_resolved {
            QueryStatus::Resolved
        } else {
            QueryStatus::Idle
        }
    }

    /// Whether this snapshot still equals a freshly created context.
    pub fn is_pristine(&self) -> bool {
        self.results.as_object().map(Map::is_empty).unwrap_or(false)
            && !self.has_resolved
            && self.query_error.is_none()
            && self.subscription_error.is_none()
            && self.in_flight.is_none()
            && self.shape_fingerprint.is_none()
    }
}

/// Partial update applied with shallow-merge semantics.
///
/// `None` leaves a field untouched. Nested values in `results` are replaced wholesale.
#[derive(Debug, Clone, Default)]
pub struct ContextPatch {
    pub results: Option<Value>,
    pub has_resolved: Option<bool>,
    pub query_error: Option<Option<FetchError>>,
    pub subscription_error: Option<Option<SubscriptionError>>,
    pub in_flight: Option<Option<PendingHandle>>,
    pub shape_fingerprint: Option<Option<ShapeFingerprint>>,
}

impl ContextPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(mut self, results: Value) -> Self {
        self.results = Some(results);
        self
    }

    pub fn has_resolved(mut self, has_resolved: bool) -> Self {
        self.has_resolved = Some(has_resolved);
        self
    }

    pub fn query_error(mut self, error: Option<FetchError>) -> Self {
        self.query_error = Some(error);
        self
    }

    pub fn subscription_error(mut self, error: Option<SubscriptionError>) -> Self {
        self.subscription_error = Some(error);
        self
    }

    pub fn in_flight(mut self, handle: Option<PendingHandle>) -> Self {
        self.in_flight = Some(handle);
        self
    }

    pub fn shape_fingerprint(mut self, fingerprint: Option<ShapeFingerprint>) -> Self {
        self.shape_fingerprint = Some(fingerprint);
        self
    }

    pub(crate) fn apply(self, context: &mut QueryContext) {
        if let Some(results) = self.results {
            context.results = results;
        }
        if let Some(has_resolved) = self.has_resolved {
            context.has_resolved = has_resolved;
        }
        if let Some(error) = self.query_error {
            context.query_error = error;
        }
        if let Some(error) = self.subscription_error {
            context.subscription_error = error;
        }
        if let Some(handle) = self.in_flight {
            context.in_flight = handle;
        }
        if let Some(fingerprint) = self.shape_fingerprint {
            context.shape_fingerprint = fingerprint;
        }
    }
}
