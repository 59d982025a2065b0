//! Usage tracking: reference counts per identity and delayed eviction.
//!
//! When the last consumer of an identity goes away an eviction is scheduled after a grace
//! period. Any consumer returning before it fires keeps the cached context and its
//! subscriptions alive.

use crate::context::QueryContextStore;
use crate::error::ConfigurationError;
use crate::types::QueryIdentity;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default grace period before an unused identity is evicted.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(30_000);

#[derive(Debug, Default)]
struct UsageEntry {
    count: usize,
    /// Bumped on every arm and cancel; a firing timer with an older generation is stale
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct UsageTracker {
    entries: Arc<DashMap<QueryIdentity, UsageEntry>>,
    store: Arc<QueryContextStore>,
    grace_period: RwLock<Duration>,
}

impl UsageTracker {
    pub fn new(store: Arc<QueryContextStore>, grace_period: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            store,
            grace_period: RwLock::new(grace_period),
        }
    }

    /// Register one more consumer. Returns the new count.
    ///
    /// A count above one means two independent consumers share the identity. That is
    /// reported as a warning only: transient double registration during view transitions
    /// is expected.
    pub fn report_used(&self, identity: &QueryIdentity) -> usize {
        let mut entry = self.entries.entry(identity.clone()).or_default();
        entry.count += 1;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
            entry.generation += 1;
            debug!(identity = %identity, "pending eviction cancelled");
        }
        if entry.count > 1 {
            warn!(
                identity = %identity,
                count = entry.count,
                "query identity reported used by more than one consumer"
            );
        }
        entry.count
    }

    /// Release one consumer. Returns the new count.
    ///
    /// Reaching zero arms the eviction timer unless one is already pending.
    pub fn report_unused(&self, identity: &QueryIdentity) -> Result<usize, ConfigurationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConfigurationError::NoRuntime(e.to_string()))?;

        let Some(mut entry) = self.entries.get_mut(identity) else {
            warn!(identity = %identity, "report_unused without a matching report_used");
            return Ok(0);
        };
        if entry.count == 0 {
            warn!(identity = %identity, "report_unused without a matching report_used");
            return Ok(0);
        }

        entry.count -= 1;
        if entry.count == 0 && entry.timer.is_none() {
            entry.generation += 1;
            let generation = entry.generation;
            let grace_period = *self.grace_period.read();
            let deadline = tokio::time::Instant::now() + grace_period;
            let entries = Arc::clone(&self.entries);
            let store = Arc::clone(&self.store);
            let target = identity.clone();
            entry.timer = Some(runtime.spawn(async move {
                tokio::time::sleep_until(deadline).await;
                expire(&entries, &store, &target, generation);
            }));
            debug!(
                identity = %identity,
                grace_ms = grace_period.as_millis() as u64,
                "eviction scheduled"
            );
        }
        Ok(entry.count)
    }

    pub fn usage_count(&self, identity: &QueryIdentity) -> usize {
        self.entries.get(identity).map(|e| e.count).unwrap_or(0)
    }

    pub fn eviction_pending(&self, identity: &QueryIdentity) -> bool {
        self.entries
            .get(identity)
            .map(|e| e.timer.is_some())
            .unwrap_or(false)
    }

    pub fn grace_period(&self) -> Duration {
        *self.grace_period.read()
    }

    /// Applies to timers armed from now on.
    pub fn set_grace_period(&self, grace_period: Duration) {
        *self.grace_period.write() = grace_period;
    }
}

/// Evict `identity` if it is still unused and the timer is still the armed one.
fn expire(
    entries: &DashMap<QueryIdentity, UsageEntry>,
    store: &QueryContextStore,
    identity: &QueryIdentity,
    generation: u64,
) {
    match entries.entry(identity.clone()) {
        Entry::Occupied(entry) => {
            if entry.get().count != 0 || entry.get().generation != generation {
                debug!(identity = %identity, "stale eviction timer ignored");
                return;
            }
            // Cleared while the usage entry is held, so a concurrent report_used waits
            store.clear(identity);
            entry.remove();
            info!(identity = %identity, "unused query evicted");
        }
        Entry::Vacant(_) => {}
    }
}
