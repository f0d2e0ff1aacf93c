//! Terminal rendering of live events

use chrono::{DateTime, FixedOffset};
use scriptlink_core::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type carrying script lifecycle updates
pub const SCRIPT_STATUS: &str = "script_status";

/// Payload of a `script_status` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStatusEvent {
    pub script_name: String,
    /// "starting", "running", "completed" or "failed"
    pub status: String,
    #[serde(default)]
    pub exit_code: i32,
    /// Milliseconds
    #[serde(default)]
    pub duration: i64,
    pub timestamp: String,
}

impl ScriptStatusEvent {
    /// Whether the run has ended (exit code and duration are meaningful)
    pub fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "failed")
    }
}

impl fmt::Display for ScriptStatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            format_timestamp(&self.timestamp),
            self.script_name,
            self.status
        )?;
        if self.is_finished() {
            write!(
                f,
                " (exit {}, {:.2}s)",
                self.exit_code,
                self.duration as f64 / 1000.0
            )?;
        }
        Ok(())
    }
}

/// Render an RFC 3339 timestamp in its own offset, or pass it through
pub fn format_timestamp(raw: &str) -> String {
    match DateTime::<FixedOffset>::parse_from_rfc3339(raw) {
        Ok(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => raw.to_string(),
    }
}

/// One output line for `message`
///
/// Raw mode prints the message as received JSON. Otherwise script status
/// updates get a readable summary and anything else is shown as type and
/// payload.
pub fn render(message: &Message, raw: bool) -> String {
    if raw {
        return serde_json::to_string(message).unwrap_or_else(|_| message.kind.clone());
    }

    if message.is(SCRIPT_STATUS) {
        match message.data_as::<ScriptStatusEvent>() {
            Ok(event) => return event.to_string(),
            Err(e) => tracing::debug!("Unexpected script_status payload: {}", e),
        }
    }

    format!(
        "[{}] {}: {}",
        format_timestamp(&message.timestamp),
        message.kind,
        message.data
    )
}
