//! Wire message received from (or sent to) the live-event endpoint

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Structured message carried in a single text frame
///
/// Wire shape: `{ "type": string, "data": any, "timestamp": string }`.
/// `data` stays opaque; subscribers decode it with [`Message::data_as`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Discriminant used to route the message to handlers
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque payload
    pub data: Value,

    /// Producer timestamp (RFC 3339 from the run-script-service server)
    pub timestamp: String,
}

impl Message {
    /// Create message
    pub fn new(kind: impl Into<String>, data: Value, timestamp: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: timestamp.into(),
        }
    }

    /// Check message type tag
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Decode the payload into a caller-supplied type
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}
