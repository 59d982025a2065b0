//! Awaitable handle of an outstanding execution.

use crate::error::FetchError;
use crate::types::ExecutionEpoch;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::IntoFuture;
use tokio::sync::oneshot;

type SharedOutcome = Shared<BoxFuture<'static, Result<(), FetchError>>>;

/// Resolves once the fetch settled and its subscriptions were set up.
///
/// Cheap to clone; every clone observes the same outcome.
#[derive(Clone)]
pub struct PendingHandle {
    epoch: ExecutionEpoch,
    outcome: SharedOutcome,
}

impl PendingHandle {
    pub(crate) fn from_receiver(
        epoch: ExecutionEpoch,
        receiver: oneshot::Receiver<Result<(), FetchError>>,
    ) -> Self {
        let outcome = async move {
            receiver
                .await
                .unwrap_or_else(|_| Err(FetchError::Aborted("execution dropped".to_string())))
        }
        .boxed()
        .shared();
        Self { epoch, outcome }
    }

    pub(crate) fn ready(epoch: ExecutionEpoch, result: Result<(), FetchError>) -> Self {
        Self {
            epoch,
            outcome: futures::future::ready(result).boxed().shared(),
        }
    }

    pub fn epoch(&self) -> ExecutionEpoch {
        self.epoch
    }

    /// Outcome if already settled, without waiting.
    pub fn peek(&self) -> Option<Result<(), FetchError>> {
        self.outcome.peek().cloned()
    }

    pub async fn wait(self) -> Result<(), FetchError> {
        self.outcome.await
    }
}

impl IntoFuture for PendingHandle {
    type Output = Result<(), FetchError>;
    type IntoFuture = SharedOutcome;

    fn into_future(self) -> Self::IntoFuture {
        self.outcome
    }
}

impl fmt::Debug for PendingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingHandle")
            .field("epoch", &self.epoch)
            .field("settled", &self.outcome.peek().is_some())
            .finish()
    }
}
