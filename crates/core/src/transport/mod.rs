//! Transport contract between the connection state machine and the network
//!
//! A [`Transport`] opens connections; each opened connection is a
//! [`TransportHandle`] for outbound traffic plus a stream of
//! [`TransportEvent`]s delivered through an [`EventSink`].

pub mod mock;
pub mod reconnect;
pub mod websocket;

pub use mock::MockTransport;
pub use reconnect::{reconnect_config, ReconnectConfig};
pub use websocket::WebSocketTransport;

use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::types::TransportEvent;
use crate::{CoreError, Result};

/// Receiver side of transport notifications
///
/// Cheap to clone. Each sink is bound to one connection attempt, so the
/// consumer can tell events of a superseded connection apart.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    /// Create sink from a delivery callback
    pub fn new(deliver: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Deliver one event
    pub fn emit(&self, event: TransportEvent) {
        tracing::trace!("Transport event: {}", event.label());
        (self.deliver)(event);
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// Connection factory
///
/// `open` must not block: it validates its input, starts the open
/// handshake in the background and returns immediately. Construction
/// failures (malformed URL, disallowed scheme) are returned as `Err` and no
/// event is emitted for them. Everything after that is reported through
/// `events`, ending with exactly one `Close`.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &str, events: EventSink) -> Result<Box<dyn TransportHandle>>;
}

/// Live connection handle
pub trait TransportHandle: Send {
    /// Queue a text frame
    fn send(&self, text: String) -> Result<()>;

    /// Start the close handshake with the given code and reason
    fn close(&mut self, code: u16, reason: &str);
}

/// Parse and validate a WebSocket endpoint
pub fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| CoreError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(CoreError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(CoreError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}
