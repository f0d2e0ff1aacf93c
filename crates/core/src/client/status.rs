//! Observable connection status

use std::time::Duration;

use crate::types::Message;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected
    #[default]
    Idle,
    /// Open handshake in progress
    Connecting,
    /// Handshake completed, no close observed yet
    Open,
    /// Waiting for the backoff timer before the next attempt
    ReconnectPending,
    /// Closed; stays here until the next `connect`
    Closed,
}

/// Snapshot of everything callers may observe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    pub state: ConnectionState,
    /// True iff `state == Open`
    pub is_connected: bool,
    pub last_error: Option<String>,
    pub last_message: Option<Message>,
    /// Automatic reconnect attempts since the last successful open
    pub attempt_count: u32,
    /// Delay of the pending reconnect timer, if one is scheduled
    pub next_reconnect: Option<Duration>,
}

impl Status {
    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.is_connected = state == ConnectionState::Open;
        if state != ConnectionState::ReconnectPending {
            self.next_reconnect = None;
        }
    }
}
