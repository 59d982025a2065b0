//! Result accumulation boundary and a shallow-merge reference implementation.

use crate::error::TransportError;
use crate::transport::{RawResponse, StreamMessage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of change carried by a subscription message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// Payload and operation extracted from a stream message.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdate {
    pub node: Value,
    pub operation: Operation,
}

/// Folds fetch results and stream messages into the aggregate stored on a context.
///
/// Implementations must be cheap: they run while the identity's context entry is locked.
pub trait ResultAccumulator: Send + Sync {
    fn apply_fetch_result(&self, raw: RawResponse) -> Result<Value, TransportError>;

    fn extract_update(&self, message: &StreamMessage) -> Result<SubscriptionUpdate, TransportError>;

    fn apply_subscription_message(
        &self,
        node: Value,
        operation: Operation,
        previous: &Value,
    ) -> Value;
}

/// Treats the aggregate as one JSON object.
///
/// Inserts and updates overwrite the node's top-level keys, deletes remove them.
/// Messages look like `{"operation": "update", "node": {...}}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShallowMergeAccumulator;

#[derive(Deserialize)]
struct WireUpdate {
    operation: Operation,
    node: Value,
}

impl ResultAccumulator for ShallowMergeAccumulator {
    fn apply_fetch_result(&self, raw: RawResponse) -> Result<Value, TransportError> {
        match raw {
            Value::Object(_) => Ok(raw),
            Value::Null => Ok(Value::Object(Map::new())),
            other => Err(TransportError::Malformed(format!(
                "fetch result must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    fn extract_update(
        &self,
        message: &StreamMessage,
    ) -> Result<SubscriptionUpdate, TransportError> {
        let wire: WireUpdate = serde_json::from_value(message.payload.clone()).map_err(|e| {
            TransportError::Malformed(format!(
                "subscription '{}' sent an unreadable message: {}",
                message.subscription, e
            ))
        })?;
        if !wire.node.is_object() {
            return Err(TransportError::Malformed(format!(
                "subscription '{}' sent a {} node",
                message.subscription,
                json_kind(&wire.node)
            )));
        }
        Ok(SubscriptionUpdate {
            node: wire.node,
            operation: wire.operation,
        })
    }

    fn apply_subscription_message(
        &self,
        node: Value,
        operation: Operation,
        previous: &Value,
    ) -> Value {
        let mut merged = previous.as_object().cloned().unwrap_or_default();
        let Value::Object(fields) = node else {
            return Value::Object(merged);
        };
        match operation {
            Operation::Insert | Operation::Update => {
                for (key, value) in fields {
                    merged.insert(key, value);
                }
            }
            Operation::Delete => {
                for key in fields.keys() {
                    merged.remove(key);
                }
            }
        }
        Value::Object(merged)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
