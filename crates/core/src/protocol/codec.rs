//! JSON text-frame codec for live-event messages

use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::types::Message;

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Message codec for serialization/deserialization
pub struct MessageCodec;

impl MessageCodec {
    /// Encode an outbound payload as a JSON text frame
    pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
        let text = serde_json::to_string(payload)?;

        if text.len() > MAX_FRAME_SIZE {
            return Err(CoreError::MessageTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        Ok(text)
    }

    /// Decode a single JSON document into a message
    ///
    /// The document must be an object with a string `type`, a `data` field
    /// (any JSON value, including null) and a string `timestamp`.
    pub fn decode(text: &str) -> Result<Message> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(CoreError::MessageTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let value: Value = serde_json::from_str(text)
            .map_err(|e| CoreError::InvalidMessageFormat(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decode a frame that may carry several JSON documents
    ///
    /// The server coalesces queued broadcasts into one frame, separated by
    /// newlines. Documents are read as a stream, so a single object spread
    /// over several lines is still one message. A document that is valid
    /// JSON but not a message yields its own error and reading continues;
    /// a syntax error ends the frame after the documents already read.
    pub fn decode_frame(text: &str) -> Vec<Result<Message>> {
        if text.len() > MAX_FRAME_SIZE {
            return vec![Err(CoreError::MessageTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            })];
        }

        let mut results = Vec::new();
        for document in serde_json::Deserializer::from_str(text).into_iter::<Value>() {
            match document {
                Ok(value) => results.push(Self::from_value(value)),
                Err(e) => {
                    results.push(Err(CoreError::InvalidMessageFormat(e.to_string())));
                    break;
                }
            }
        }
        results
    }

    fn from_value(value: Value) -> Result<Message> {
        // serde accepts sequences for structs; the wire format only allows objects
        if !value.is_object() {
            return Err(CoreError::InvalidMessageFormat(
                "Frame is not a JSON object".into(),
            ));
        }

        serde_json::from_value(value).map_err(|e| CoreError::InvalidMessageFormat(e.to_string()))
    }
}
