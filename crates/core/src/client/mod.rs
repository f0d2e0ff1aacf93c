//! Resilient live-event client
//!
//! [`Client`] is the public facade: it exposes the observable [`Status`] and
//! the connect/disconnect/send/subscribe operations. Work happens on the
//! tokio runtime the client was created on; no method blocks or awaits.

mod config;
mod machine;
mod status;

pub use config::{ClientConfig, DEFAULT_HOST, DEFAULT_PATH};
pub use status::{ConnectionState, Status};

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::registry::{Handler, HandlerRegistry};
use crate::transport::{Transport, WebSocketTransport};
use crate::types::Message;
use crate::{lock, CoreError, Result};
use machine::{run_event_loop, ConnectionStateMachine};

/// Live-event client
///
/// Cheap to clone; all clones share one connection. The event loop stops
/// when the last clone is dropped. Call [`Client::dispose`] when done to
/// close the connection and drop every subscription.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    machine: Arc<Mutex<ConnectionStateMachine>>,
    registry: Arc<HandlerRegistry>,
    status: watch::Receiver<Status>,
    event_loop: JoinHandle<()>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl Client {
    /// Create client over WebSocket
    ///
    /// Must be called from within a tokio runtime. `wss://` endpoints go
    /// through rustls, which needs a process-wide `CryptoProvider`; install
    /// one first (e.g. `rustls::crypto::ring::default_provider().install_default()`)
    /// or TLS connects will fail.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(WebSocketTransport::new()))
    }

    /// Create client over a custom transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| CoreError::Runtime(e.to_string()))?;
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let machine = ConnectionStateMachine::new(transport, config, runtime.clone(), signals_tx);
        let status = machine.watch();
        let machine = Arc::new(Mutex::new(machine));
        let registry = Arc::new(HandlerRegistry::new());

        let event_loop = runtime.spawn(run_event_loop(
            machine.clone(),
            registry.clone(),
            signals_rx,
        ));

        Ok(Self {
            inner: Arc::new(ClientInner {
                machine,
                registry,
                status,
                event_loop,
            }),
        })
    }

    /// Connect to `url`, the configured url, or the derived default
    ///
    /// Returns immediately; the outcome shows up in [`Client::status`].
    /// Any attempt already in flight is abandoned.
    pub fn connect(&self, url: Option<&str>) {
        lock(&self.inner.machine).connect(url);
    }

    /// Cancel pending reconnects and close the connection cleanly
    pub fn disconnect(&self) {
        lock(&self.inner.machine).disconnect();
    }

    /// Serialize `payload` as JSON and send it
    ///
    /// Returns false (and records `last_error`) when not connected or when
    /// serialization fails. Nothing is queued for later delivery.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        lock(&self.inner.machine).send(payload)
    }

    /// Register `handler` for messages of type `kind` (`"*"` for all)
    pub fn subscribe(&self, kind: impl Into<String>, handler: Handler) {
        self.inner.registry.subscribe(kind, handler);
    }

    /// Register a closure and return its handle for later `unsubscribe`
    pub fn on(&self, kind: impl Into<String>, f: impl Fn(&Message) + Send + Sync + 'static) -> Handler {
        let handler = Handler::new(f);
        self.subscribe(kind, handler.clone());
        handler
    }

    /// Remove one registration of `handler` under `kind`
    pub fn unsubscribe(&self, kind: &str, handler: &Handler) {
        self.inner.registry.unsubscribe(kind, handler);
    }

    /// Remove handlers for `kind`, or all handlers when None
    pub fn clear(&self, kind: Option<&str>) {
        self.inner.registry.clear(kind);
    }

    /// Tear down: disconnect, then drop every subscription
    pub fn dispose(&self) {
        self.disconnect();
        self.clear(None);
        tracing::debug!("Client disposed");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().is_connected
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.status.borrow().last_error.clone()
    }

    pub fn last_message(&self) -> Option<Message> {
        self.inner.status.borrow().last_message.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.borrow().state
    }

    pub fn attempt_count(&self) -> u32 {
        self.inner.status.borrow().attempt_count
    }

    /// Snapshot of the full status
    pub fn status(&self) -> Status {
        self.inner.status.borrow().clone()
    }

    /// Receiver that is notified on every status change
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.inner.status.clone()
    }

    /// Number of handlers registered under `kind`
    pub fn handler_count(&self, kind: &str) -> usize {
        self.inner.registry.handler_count(kind)
    }
}
