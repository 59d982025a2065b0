//! Lifecycle API
//!
//! [`QueryLifecycle`] composes the context store, the usage tracker, and the orchestrator
//! behind the operations consumers call: `ensure_query`, `get`, `clear`, `report_used`,
//! and `report_unused`.

use crate::accumulator::ResultAccumulator;
use crate::compiler::QueryCompiler;
use crate::config::LifecycleConfig;
use crate::context::{ContextBus, ContextEvent, PendingHandle, QueryContext, QueryContextStore};
use crate::error::ConfigurationError;
use crate::orchestrator::{OrchestratorBuilder, QueryOrchestrator};
use crate::transport::Transport;
use crate::types::{Credentials, QueryIdentity};
use crate::usage::UsageTracker;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

pub struct QueryLifecycle<D> {
    store: Arc<QueryContextStore>,
    usage: Arc<UsageTracker>,
    orchestrator: QueryOrchestrator<D>,
}

impl<D: 'static> QueryLifecycle<D> {
    pub fn builder() -> LifecycleBuilder<D> {
        LifecycleBuilder {
            config: LifecycleConfig::default(),
            orchestrator: OrchestratorBuilder::default(),
        }
    }

    /// See [`QueryOrchestrator::ensure_query`].
    pub fn ensure_query(
        &self,
        identity: &QueryIdentity,
        definition: &D,
        credentials: &Credentials,
    ) -> Result<Option<PendingHandle>, ConfigurationError> {
        self.orchestrator
            .ensure_query(identity, definition, credentials)
    }

    pub fn get(&self, identity: &QueryIdentity) -> QueryContext {
        self.store.get(identity)
    }

    pub fn clear(&self, identity: &QueryIdentity) {
        self.store.clear(identity)
    }

    pub fn report_used(&self, identity: &QueryIdentity) -> usize {
        self.usage.report_used(identity)
    }

    pub fn report_unused(&self, identity: &QueryIdentity) -> Result<usize, ConfigurationError> {
        self.usage.report_unused(identity)
    }

    /// Report usage now and release it when the guard is dropped.
    pub fn observe(&self, identity: &QueryIdentity) -> UsageGuard {
        self.usage.report_used(identity);
        UsageGuard {
            identity: identity.clone(),
            usage: Arc::clone(&self.usage),
        }
    }

    /// Receiver of every published context update.
    pub fn events(&self) -> broadcast::Receiver<ContextEvent> {
        self.store.bus().subscribe()
    }

    /// Apply the runtime-adjustable parts of a new configuration.
    pub fn reload(&self, config: &LifecycleConfig) -> Result<(), ConfigurationError> {
        config.validate()?;
        self.usage.set_grace_period(config.eviction.grace_period());
        Ok(())
    }

    pub fn store(&self) -> &Arc<QueryContextStore> {
        &self.store
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }
}

/// Wires a [`QueryLifecycle`] from configuration and collaborators.
pub struct LifecycleBuilder<D> {
    config: LifecycleConfig,
    orchestrator: OrchestratorBuilder<D>,
}

impl<D: 'static> LifecycleBuilder<D> {
    pub fn config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn compiler(mut self, compiler: impl QueryCompiler<D> + 'static) -> Self {
        self.orchestrator = self.orchestrator.compiler(compiler);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.orchestrator = self.orchestrator.transport(transport);
        self
    }

    pub fn accumulator(mut self, accumulator: Arc<dyn ResultAccumulator>) -> Self {
        self.orchestrator = self.orchestrator.accumulator(accumulator);
        self
    }

    pub fn build(self) -> Result<QueryLifecycle<D>, ConfigurationError> {
        self.config.validate()?;
        let store = QueryContextStore::shared(ContextBus::new(self.config.events.channel_capacity));
        let orchestrator = self.orchestrator.store(Arc::clone(&store)).build()?;
        let usage = Arc::new(UsageTracker::new(
            Arc::clone(&store),
            self.config.eviction.grace_period(),
        ));
        Ok(QueryLifecycle {
            store,
            usage,
            orchestrator,
        })
    }
}

/// Balanced `report_used` / `report_unused` pair for one observer.
#[must_use = "dropping the guard immediately releases the usage"]
pub struct UsageGuard {
    identity: QueryIdentity,
    usage: Arc<UsageTracker>,
}

impl UsageGuard {
    pub fn identity(&self) -> &QueryIdentity {
        &self.identity
    }
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        if let Err(err) = self.usage.report_unused(&self.identity) {
            warn!(
                identity = %self.identity,
                error = %err,
                "failed to release query usage"
            );
        }
    }
}
