//! In-process bus publishing context updates as they happen.

use crate::context::QueryContext;
use crate::types::QueryIdentity;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEventKind {
    FetchStarted,
    Fetched,
    FetchFailed,
    Merged,
    SubscriptionFailed,
    Cleared,
}

impl ContextEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextEventKind::FetchStarted => "fetch_started",
            ContextEventKind::Fetched => "fetched",
            ContextEventKind::FetchFailed => "fetch_failed",
            ContextEventKind::Merged => "merged",
            ContextEventKind::SubscriptionFailed => "subscription_failed",
            ContextEventKind::Cleared => "cleared",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextEvent {
    pub identity: QueryIdentity,
    pub kind: ContextEventKind,
    pub snapshot: QueryContext,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ContextBus {
    sender: broadcast::Sender<ContextEvent>,
}

impl ContextBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.sender.subscribe()
    }

    /// Publish without blocking. Having no receivers is not an error.
    pub fn emit(&self, identity: &QueryIdentity, kind: ContextEventKind, snapshot: QueryContext) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        let _ = self.sender.send(ContextEvent {
            identity: identity.clone(),
            kind,
            snapshot,
            at: Utc::now(),
        });
    }
}
