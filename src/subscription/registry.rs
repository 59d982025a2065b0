//! Per-identity registry of live subscription cancel handles.

use crate::types::{ExecutionEpoch, QueryIdentity};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancels one open subscription stream. Idempotent.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    subscription: String,
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new(subscription: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            subscription: subscription.into(),
            token,
        }
    }

    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!(subscription = %self.subscription, "cancelling subscription stream");
            self.token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }
}

#[derive(Debug)]
struct SubscriptionSet {
    /// Execution allowed to install handles
    epoch: ExecutionEpoch,
    /// Set was torn down for this epoch; late installs are cancelled on arrival
    closed: bool,
    handles: Vec<CancelHandle>,
}

/// Holds exactly one live subscription set per identity.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    sets: DashMap<QueryIdentity, SubscriptionSet>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the current set and reserve the identity for `epoch`.
    ///
    /// Only handles tagged with `epoch` are accepted by [`set_cancellers`](Self::set_cancellers)
    /// afterwards.
    pub fn begin(&self, identity: &QueryIdentity, epoch: ExecutionEpoch) {
        let previous = {
            let mut set = self
                .sets
                .entry(identity.clone())
                .or_insert_with(|| SubscriptionSet {
                    epoch,
                    closed: false,
                    handles: Vec::new(),
                });
            set.epoch = epoch;
            set.closed = false;
            std::mem::take(&mut set.handles)
        };
        cancel_in_order(previous);
    }

    /// Replace the stored set wholesale.
    ///
    /// Does not cancel the previous handles. Returns `false` and cancels `handles` when
    /// `epoch` is no longer the reserved execution, or the set has been torn down already.
    pub fn set_cancellers(
        &self,
        identity: &QueryIdentity,
        epoch: ExecutionEpoch,
        handles: Vec<CancelHandle>,
    ) -> bool {
        let rejected = match self.sets.get_mut(identity) {
            Some(mut set) if set.epoch == epoch && !set.closed => {
                set.handles = handles;
                None
            }
            _ => Some(handles),
        };
        match rejected {
            None => true,
            Some(handles) => {
                debug!(
                    identity = %identity,
                    epoch = %epoch,
                    count = handles.len(),
                    "discarding subscription handles of a superseded execution"
                );
                cancel_in_order(handles);
                false
            }
        }
    }

    /// Invoke every stored handle in opening order, then clear the set.
    pub fn cancel_all(&self, identity: &QueryIdentity) {
        let handles = match self.sets.get_mut(identity) {
            Some(mut set) => {
                set.closed = true;
                std::mem::take(&mut set.handles)
            }
            None => return,
        };
        cancel_in_order(handles);
    }

    /// Cancel everything and forget the identity. Idempotent.
    pub fn remove(&self, identity: &QueryIdentity) {
        if let Some((_, set)) = self.sets.remove(identity) {
            cancel_in_order(set.handles);
        }
    }

    /// Whether `epoch` is still the reserved, open execution for `identity`.
    pub fn is_live(&self, identity: &QueryIdentity, epoch: ExecutionEpoch) -> bool {
        self.sets
            .get(identity)
            .map(|set| set.epoch == epoch && !set.closed)
            .unwrap_or(false)
    }

    pub fn live_count(&self, identity: &QueryIdentity) -> usize {
        self.sets
            .get(identity)
            .map(|set| set.handles.len())
            .unwrap_or(0)
    }
}

fn cancel_in_order(handles: Vec<CancelHandle>) {
    for handle in &handles {
        handle.cancel();
    }
}
