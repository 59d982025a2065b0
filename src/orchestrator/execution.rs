//! One fetch execution and the subscription set it opens on success.

use crate::accumulator::ResultAccumulator;
use crate::compiler::CompiledQuery;
use crate::context::{ContextEventKind, QueryContextStore};
use crate::error::{FetchError, SubscriptionError};
use crate::subscription::pump::{tear_down, StreamPump};
use crate::subscription::CancelHandle;
use crate::transport::Transport;
use crate::types::{Credentials, ExecutionEpoch, QueryIdentity};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(super) struct Execution {
    pub identity: QueryIdentity,
    pub epoch: ExecutionEpoch,
    pub compiled: CompiledQuery,
    pub credentials: Credentials,
    pub transport: Arc<dyn Transport>,
    pub accumulator: Arc<dyn ResultAccumulator>,
    pub store: Arc<QueryContextStore>,
}

impl Execution {
    pub(super) async fn run(self) -> Result<(), FetchError> {
        let started = Instant::now();
        let fetched = match self
            .transport
            .execute(&self.compiled.fetch_plan, &self.credentials)
            .await
        {
            Ok(raw) => self.accumulator.apply_fetch_result(raw),
            Err(err) => Err(err),
        };

        let aggregate = match fetched {
            Ok(aggregate) => aggregate,
            Err(err) => return self.settle_failure(FetchError::Transport(err)),
        };

        let applied = self
            .store
            .modify_if_current(&self.identity, self.epoch, |ctx| {
                ctx.results = aggregate;
                ctx.has_resolved = true;
                ctx.query_error = None;
                self.store
                    .bus()
                    .emit(&self.identity, ContextEventKind::Fetched, ctx.clone());
            });
        if applied.is_none() {
            debug!(
                identity = %self.identity,
                epoch = %self.epoch,
                "discarding fetch result of a superseded execution"
            );
            return Err(self.superseded());
        }
        info!(
            identity = %self.identity,
            epoch = %self.epoch,
            duration_ms = started.elapsed().as_millis() as u64,
            "fetch resolved"
        );

        self.open_subscriptions().await;

        let settled = self
            .store
            .modify_if_current(&self.identity, self.epoch, |ctx| ctx.in_flight = None);
        if settled.is_none() {
            return Err(self.superseded());
        }
        Ok(())
    }

    fn settle_failure(&self, error: FetchError) -> Result<(), FetchError> {
        let recorded = self
            .store
            .modify_if_current(&self.identity, self.epoch, |ctx| {
                ctx.query_error = Some(error.clone());
                ctx.has_resolved = true;
                ctx.in_flight = None;
                self.store.registry().cancel_all(&self.identity);
                self.store
                    .bus()
                    .emit(&self.identity, ContextEventKind::FetchFailed, ctx.clone());
            });
        if recorded.is_none() {
            debug!(
                identity = %self.identity,
                epoch = %self.epoch,
                error = %error,
                "discarding fetch failure of a superseded execution"
            );
            return Err(self.superseded());
        }
        warn!(
            identity = %self.identity,
            epoch = %self.epoch,
            error = %error,
            "fetch failed"
        );
        Err(error)
    }

    /// Open one stream per descriptor and install the handles as the live set.
    async fn open_subscriptions(&self) {
        let execution = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.compiled.subscriptions.len());

        for descriptor in &self.compiled.subscriptions {
            let live = self.store.registry().is_live(&self.identity, self.epoch);
            if execution.is_cancelled() || !live {
                break;
            }
            match self
                .transport
                .open_stream(descriptor, &self.credentials)
                .await
            {
                Ok(stream) => {
                    let token = execution.child_token();
                    handles.push(CancelHandle::new(descriptor.name.clone(), token.clone()));
                    let pump = StreamPump {
                        identity: self.identity.clone(),
                        epoch: self.epoch,
                        subscription: descriptor.name.clone(),
                        store: Arc::clone(&self.store),
                        accumulator: Arc::clone(&self.accumulator),
                        token,
                        execution: execution.clone(),
                    };
                    tokio::spawn(pump.run(stream));
                }
                Err(err) => {
                    // Streams opened so far are in `handles`; the execution token stops them
                    tear_down(
                        &self.store,
                        &self.identity,
                        self.epoch,
                        &execution,
                        SubscriptionError {
                            subscription: descriptor.name.clone(),
                            source: err,
                        },
                    );
                    break;
                }
            }
        }

        let opened = handles.len();
        if execution.is_cancelled() {
            for handle in &handles {
                handle.cancel();
            }
            return;
        }
        if self
            .store
            .registry()
            .set_cancellers(&self.identity, self.epoch, handles)
        {
            debug!(
                identity = %self.identity,
                epoch = %self.epoch,
                subscriptions = opened,
                "subscriptions installed"
            );
        }
    }

    fn superseded(&self) -> FetchError {
        FetchError::Superseded {
            identity: self.identity.clone(),
        }
    }
}
