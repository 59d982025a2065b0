//! Transport boundary: one-shot fetch execution and long-lived message streams.

use crate::compiler::{FetchPlan, SubscriptionDescriptor};
use crate::error::TransportError;
use crate::types::Credentials;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

/// Undecoded response of a fetch execution.
pub type RawResponse = Value;

/// One message delivered by a subscription stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub subscription: String,
    pub payload: Value,
}

/// Live subscription stream. `Err` items are transport errors of that stream.
///
/// Dropping the stream closes the subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<StreamMessage, TransportError>> + Send>>;

/// Sends requests and opens subscription streams.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute the fetch plan once
    async fn execute(
        &self,
        plan: &FetchPlan,
        credentials: &Credentials,
    ) -> Result<RawResponse, TransportError>;

    /// Establish one subscription stream
    async fn open_stream(
        &self,
        descriptor: &SubscriptionDescriptor,
        credentials: &Credentials,
    ) -> Result<MessageStream, TransportError>;
}
