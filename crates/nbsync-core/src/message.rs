#![forbid(unsafe_code)]

//! Wire convention for commands and replies.
//!
//! Outgoing commands have the shape
//! `{ "type": <command class>, "id": <tag>, "detail": <payload>? }`.
//! Replies carry no id; they are recognised by a top-level key named after
//! the concept they answer (for example `{"bandstats": {...}}`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing command envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command class, taken from configuration.
    #[serde(rename = "type")]
    pub kind: String,
    /// Discriminant tag, e.g. `"band-stats"`.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(kind: impl Into<String>, id: impl Into<String>, detail: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            detail,
        }
    }

    /// Serialize into the value handed to the transport.
    #[must_use]
    pub fn to_value(&self) -> Value {
        // Two strings and an optional `Value` cannot fail to serialize.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Top-level payload of a reply under `key`, if the reply carries it.
#[must_use]
pub fn reply_section<'a>(message: &'a Value, key: &str) -> Option<&'a Value> {
    message.as_object().and_then(|obj| obj.get(key))
}
