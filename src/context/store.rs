//! Sharded store of query contexts keyed by identity.
//!
//! The store owns both the contexts and, through [`SubscriptionRegistry`], the live
//! subscription sets. Lock order is always context entry, then registry entry.

use crate::context::events::{ContextBus, ContextEventKind};
use crate::context::{ContextPatch, QueryContext};
use crate::subscription::SubscriptionRegistry;
use crate::types::{ExecutionEpoch, QueryIdentity};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

pub struct QueryContextStore {
    contexts: DashMap<QueryIdentity, QueryContext>,
    registry: SubscriptionRegistry,
    bus: ContextBus,
}

impl QueryContextStore {
    pub fn new(bus: ContextBus) -> Self {
        Self {
            contexts: DashMap::new(),
            registry: SubscriptionRegistry::new(),
            bus,
        }
    }

    pub fn shared(bus: ContextBus) -> Arc<Self> {
        Arc::new(Self::new(bus))
    }

    /// Current snapshot, lazily creating a default context.
    pub fn get(&self, identity: &QueryIdentity) -> QueryContext {
        self.contexts
            .entry(identity.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Snapshot without creating a context.
    pub fn peek(&self, identity: &QueryIdentity) -> Option<QueryContext> {
        self.contexts.get(identity).map(|ctx| ctx.value().clone())
    }

    pub fn contains(&self, identity: &QueryIdentity) -> bool {
        self.contexts.contains_key(identity)
    }

    /// Shallow-merge `patch` into the context, creating it if needed.
    pub fn update(&self, identity: &QueryIdentity, patch: ContextPatch) -> QueryContext {
        self.with_context(identity, |ctx| patch.apply(ctx)).1
    }

    /// Run `f` with exclusive access to the identity's context, creating it if needed.
    pub fn with_context<R>(
        &self,
        identity: &QueryIdentity,
        f: impl FnOnce(&mut QueryContext) -> R,
    ) -> (R, QueryContext) {
        let mut entry = self.contexts.entry(identity.clone()).or_default();
        let ctx = entry.value_mut();
        let result = f(ctx);
        ctx.updated_at = Utc::now();
        (result, ctx.clone())
    }

    /// Run `f` only if `epoch` is still the context's live execution.
    ///
    /// Never creates a context: an evicted identity stays evicted.
    pub fn modify_if_current<R>(
        &self,
        identity: &QueryIdentity,
        epoch: ExecutionEpoch,
        f: impl FnOnce(&mut QueryContext) -> R,
    ) -> Option<(R, QueryContext)> {
        let mut entry = self.contexts.get_mut(identity)?;
        let ctx = entry.value_mut();
        if ctx.epoch != Some(epoch) {
            return None;
        }
        let result = f(ctx);
        ctx.updated_at = Utc::now();
        Some((result, ctx.clone()))
    }

    /// Remove the context and cancel its subscriptions. Idempotent.
    pub fn clear(&self, identity: &QueryIdentity) {
        match self.contexts.entry(identity.clone()) {
            Entry::Occupied(entry) => {
                self.registry.remove(identity);
                entry.remove();
                debug!(identity = %identity, "query context cleared");
                self.bus
                    .emit(identity, ContextEventKind::Cleared, QueryContext::default());
            }
            Entry::Vacant(_) => {
                self.registry.remove(identity);
            }
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &ContextBus {
        &self.bus
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn identities(&self) -> Vec<QueryIdentity> {
        let mut identities: Vec<_> = self.contexts.iter().map(|e| e.key().clone()).collect();
        identities.sort();
        identities
    }
}
