//! Scriptlink Core - resilient live-event client
//!
//! This crate provides:
//! - Wire message type and JSON frame codec
//! - Transport contract with a WebSocket implementation and a test mock
//! - Reconnect policy (exponential backoff, capped, bounded attempts)
//! - Handler registry keyed by message type, with a wildcard tag
//! - The `Client` facade tying them together
//! - Error types

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod types;

// Re-export common types
pub use client::{Client, ClientConfig, ConnectionState, Status};
pub use error::{CoreError, Result};
pub use protocol::MessageCodec;
pub use registry::{Handler, HandlerRegistry, WILDCARD};
pub use transport::{MockTransport, ReconnectConfig, Transport, TransportHandle, WebSocketTransport};
pub use types::{Message, TransportEvent};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
