//! Query orchestrator: decides whether an execution is still valid and, when the query
//! shape changed, issues the fetch and wires its subscription streams.
//!
//! The orchestrator keeps no per-identity state. Everything it knows about an identity lives
//! in the [`QueryContextStore`] and its subscription registry.

mod execution;

use crate::accumulator::ResultAccumulator;
use crate::compiler::QueryCompiler;
use crate::context::{ContextEventKind, PendingHandle, QueryContextStore};
use crate::error::{CompileError, ConfigurationError, FetchError};
use crate::transport::Transport;
use crate::types::{Credentials, ExecutionEpoch, QueryIdentity, ShapeFingerprint};
use execution::Execution;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

enum Claim {
    /// Shape unchanged; hand back whatever is still outstanding
    Unchanged(Option<PendingHandle>),
    Started {
        epoch: ExecutionEpoch,
        handle: PendingHandle,
        sender: oneshot::Sender<Result<(), FetchError>>,
    },
}

pub struct QueryOrchestrator<D> {
    compiler: Arc<dyn QueryCompiler<D>>,
    transport: Arc<dyn Transport>,
    accumulator: Arc<dyn ResultAccumulator>,
    store: Arc<QueryContextStore>,
}

impl<D: 'static> QueryOrchestrator<D> {
    pub fn builder() -> OrchestratorBuilder<D> {
        OrchestratorBuilder::default()
    }

    /// Make sure the context of `identity` reflects `definition`.
    ///
    /// Returns the handle of the execution to await, or `None` when the shape is unchanged
    /// and nothing is outstanding. Failures of the fetch and of subscriptions are stored on
    /// the context, never returned here.
    pub fn ensure_query(
        &self,
        identity: &QueryIdentity,
        definition: &D,
        credentials: &Credentials,
    ) -> Result<Option<PendingHandle>, ConfigurationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConfigurationError::NoRuntime(e.to_string()))?;

        let compiled = match self.compiler.compile(definition, identity) {
            Ok(compiled) => compiled,
            Err(err) => return Ok(Some(self.fail_compile(identity, err))),
        };
        let fingerprint = compiled.fingerprint();

        match self.claim(identity, fingerprint) {
            Claim::Unchanged(handle) => {
                debug!(
                    identity = %identity,
                    fingerprint = ?fingerprint,
                    in_flight = handle.is_some(),
                    "query shape unchanged"
                );
                Ok(handle)
            }
            Claim::Started {
                epoch,
                handle,
                sender,
            } => {
                info!(
                    identity = %identity,
                    epoch = %epoch,
                    fingerprint = ?fingerprint,
                    subscriptions = compiled.subscriptions.len(),
                    "query shape changed, starting execution"
                );
                let execution = Execution {
                    identity: identity.clone(),
                    epoch,
                    compiled,
                    credentials: credentials.clone(),
                    transport: Arc::clone(&self.transport),
                    accumulator: Arc::clone(&self.accumulator),
                    store: Arc::clone(&self.store),
                };
                runtime.spawn(async move {
                    let outcome = execution.run().await;
                    let _ = sender.send(outcome);
                });
                Ok(Some(handle))
            }
        }
    }

    /// Compare-and-claim under the context entry lock.
    ///
    /// The fingerprint is recorded before the fetch is issued, so a concurrent caller with
    /// the same new shape sees it and joins the outstanding execution.
    fn claim(&self, identity: &QueryIdentity, fingerprint: ShapeFingerprint) -> Claim {
        self.store.with_context(identity, |ctx| {
            // Stored errors stay until the shape changes or the identity is cleared
            if ctx.shape_fingerprint == Some(fingerprint) {
                return Claim::Unchanged(ctx.in_flight.clone());
            }
            let epoch = ExecutionEpoch::next();
            let (sender, receiver) = oneshot::channel();
            let handle = PendingHandle::from_receiver(epoch, receiver);

            // Cancels the previous set: no stale message can be merged past this point
            self.store.registry().begin(identity, epoch);

            ctx.epoch = Some(epoch);
            ctx.shape_fingerprint = Some(fingerprint);
            ctx.in_flight = Some(handle.clone());
            ctx.query_error = None;
            ctx.subscription_error = None;
            self.store
                .bus()
                .emit(identity, ContextEventKind::FetchStarted, ctx.clone());
            Claim::Started {
                epoch,
                handle,
                sender,
            }
        })
        .0
    }

    /// A definition that does not compile counts as a changed shape whose fetch failed.
    fn fail_compile(&self, identity: &QueryIdentity, err: CompileError) -> PendingHandle {
        let epoch = ExecutionEpoch::next();
        let error = FetchError::Compile(err);
        warn!(identity = %identity, error = %error, "query definition failed to compile");
        self.store.with_context(identity, |ctx| {
            self.store.registry().begin(identity, epoch);
            self.store.registry().cancel_all(identity);
            ctx.epoch = Some(epoch);
            // No fingerprint: the next call always retries the compile
            ctx.shape_fingerprint = None;
            ctx.in_flight = None;
            ctx.query_error = Some(error.clone());
            ctx.has_resolved = true;
            self.store
                .bus()
                .emit(identity, ContextEventKind::FetchFailed, ctx.clone());
        });
        PendingHandle::ready(epoch, Err(error))
    }

    pub fn store(&self) -> &Arc<QueryContextStore> {
        &self.store
    }
}

/// Wires the collaborators of a [`QueryOrchestrator`].
pub struct OrchestratorBuilder<D> {
    compiler: Option<Arc<dyn QueryCompiler<D>>>,
    transport: Option<Arc<dyn Transport>>,
    accumulator: Option<Arc<dyn ResultAccumulator>>,
    store: Option<Arc<QueryContextStore>>,
}

impl<D> Default for OrchestratorBuilder<D> {
    fn default() -> Self {
        Self {
            compiler: None,
            transport: None,
            accumulator: None,
            store: None,
        }
    }
}

impl<D: 'static> OrchestratorBuilder<D> {
    pub fn compiler(mut self, compiler: impl QueryCompiler<D> + 'static) -> Self {
        self.compiler = Some(Arc::new(compiler));
        self
    }

    pub fn shared_compiler(mut self, compiler: Arc<dyn QueryCompiler<D>>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn accumulator(mut self, accumulator: Arc<dyn ResultAccumulator>) -> Self {
        self.accumulator = Some(accumulator);
        self
    }

    pub fn store(mut self, store: Arc<QueryContextStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<QueryOrchestrator<D>, ConfigurationError> {
        Ok(QueryOrchestrator {
            compiler: self
                .compiler
                .ok_or(ConfigurationError::MissingCollaborator("query compiler"))?,
            transport: self
                .transport
                .ok_or(ConfigurationError::MissingCollaborator("transport"))?,
            accumulator: self
                .accumulator
                .ok_or(ConfigurationError::MissingCollaborator("result accumulator"))?,
            store: self
                .store
                .ok_or(ConfigurationError::MissingCollaborator("context store"))?,
        })
    }
}
