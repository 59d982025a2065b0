//! Drives one subscription stream, merging each message into its context as it arrives.

use crate::accumulator::ResultAccumulator;
use crate::context::{ContextEventKind, QueryContextStore};
use crate::error::{SubscriptionError, TransportError};
use crate::transport::{MessageStream, StreamMessage};
use crate::types::{ExecutionEpoch, QueryIdentity};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Everything a pump needs to merge into one execution's context.
pub(crate) struct StreamPump {
    pub identity: QueryIdentity,
    pub epoch: ExecutionEpoch,
    pub subscription: String,
    pub store: Arc<QueryContextStore>,
    pub accumulator: Arc<dyn ResultAccumulator>,
    /// Cancelled by this stream's [`CancelHandle`](super::CancelHandle)
    pub token: CancellationToken,
    /// Shared by every stream of the execution; cancelled on any stream failure
    pub execution: CancellationToken,
}

impl StreamPump {
    pub(crate) async fn run(self, mut stream: MessageStream) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                item = stream.next() => item,
            };
            match next {
                Some(Ok(message)) => {
                    if !self.merge(message) {
                        break;
                    }
                }
                Some(Err(err)) => {
                    self.fail(err);
                    break;
                }
                None => {
                    debug!(
                        identity = %self.identity,
                        subscription = %self.subscription,
                        "subscription stream ended"
                    );
                    break;
                }
            }
        }
        // Dropping the stream closes it on the transport side
        drop(stream);
    }

    /// Merge one message. Returns false once the pump should stop.
    fn merge(&self, message: StreamMessage) -> bool {
        let update = match self.accumulator.extract_update(&message) {
            Ok(update) => update,
            Err(err) => {
                self.fail(err);
                return false;
            }
        };

        let merged = self
            .store
            .modify_if_current(&self.identity, self.epoch, |ctx| {
                // Checked under the entry lock: a cancel racing this message wins
                if self.token.is_cancelled() {
                    return false;
                }
                ctx.results = self.accumulator.apply_subscription_message(
                    update.node,
                    update.operation,
                    &ctx.results,
                );
                self.store
                    .bus()
                    .emit(&self.identity, ContextEventKind::Merged, ctx.clone());
                true
            })
            .map(|(merged, _)| merged)
            .unwrap_or(false);

        if merged {
            trace!(
                identity = %self.identity,
                subscription = %self.subscription,
                operation = ?update.operation,
                "subscription message merged"
            );
        } else {
            debug!(
                identity = %self.identity,
                subscription = %self.subscription,
                epoch = %self.epoch,
                "dropping message of a superseded subscription"
            );
        }
        merged
    }

    fn fail(&self, err: TransportError) {
        tear_down(
            &self.store,
            &self.identity,
            self.epoch,
            &self.execution,
            SubscriptionError {
                subscription: self.subscription.clone(),
                source: err,
            },
        );
    }
}

/// Record a stream failure and cancel every subscription of the execution.
///
/// Results keep their last good value.
pub(crate) fn tear_down(
    store: &QueryContextStore,
    identity: &QueryIdentity,
    epoch: ExecutionEpoch,
    execution: &CancellationToken,
    error: SubscriptionError,
) {
    let recorded = store.modify_if_current(identity, epoch, |ctx| {
        ctx.subscription_error = Some(error.clone());
        store.registry().cancel_all(identity);
        store
            .bus()
            .emit(identity, ContextEventKind::SubscriptionFailed, ctx.clone());
    });
    execution.cancel();

    if recorded.is_some() {
        warn!(
            identity = %identity,
            epoch = %epoch,
            subscription = %error.subscription,
            error = %error.source,
            "subscription failed, cancelling all subscriptions of the query"
        );
    } else {
        debug!(
            identity = %identity,
            epoch = %epoch,
            error = %error,
            "ignoring failure of a superseded subscription"
        );
    }
}
