//! Connection state machine
//!
//! Owns the live transport handle and the reconnect timer. All transport
//! notifications and timer firings arrive as [`Signal`]s on one channel and
//! are applied in order by [`run_event_loop`]; every signal carries the
//! generation it was issued under, and anything from an older generation
//! is ignored. The generation is bumped whenever a handle is opened,
//! abandoned, or a reconnect is scheduled.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::config::ClientConfig;
use super::status::{ConnectionState, Status};
use crate::protocol::MessageCodec;
use crate::registry::HandlerRegistry;
use crate::transport::{EventSink, Transport, TransportHandle};
use crate::types::{Message, TransportEvent, CLOSE_NORMAL};
use crate::{lock, CoreError, Result};

/// Close code sent when the client itself goes away
const CLOSE_GOING_AWAY: u16 = 1001;

/// Input to the state machine
#[derive(Debug)]
pub(crate) enum Signal {
    Transport { generation: u64, event: TransportEvent },
    ReconnectDue { generation: u64 },
}

/// Messages decoded from one inbound frame, awaiting dispatch
#[derive(Debug)]
pub(crate) struct Inbound {
    pub generation: u64,
    pub messages: Vec<Message>,
}

pub(crate) struct ConnectionStateMachine {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    runtime: Handle,
    signals: mpsc::UnboundedSender<Signal>,
    status: watch::Sender<Status>,
    generation: u64,
    handle: Option<Box<dyn TransportHandle>>,
    reconnect_timer: Option<JoinHandle<()>>,
    url: Option<String>,
}

impl ConnectionStateMachine {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        runtime: Handle,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        let (status, _) = watch::channel(Status::default());
        Self {
            transport,
            config,
            runtime,
            signals,
            status,
            generation: 0,
            handle: None,
            reconnect_timer: None,
            url: None,
        }
    }

    pub fn watch(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    fn update(&self, f: impl FnOnce(&mut Status)) {
        self.status.send_modify(f);
    }

    /// Start a fresh connection, superseding any attempt in flight
    pub fn connect(&mut self, url: Option<&str>) {
        let url = self.config.resolve_url(url);

        if self.handle.is_some() || self.reconnect_timer.is_some() {
            tracing::debug!("Superseding current connection attempt");
        }
        self.cancel_reconnect();
        self.release_handle(CLOSE_NORMAL, "Superseded by new connection");

        tracing::info!("Connecting to {}", url);
        self.url = Some(url.clone());
        self.open(&url);
    }

    /// Cancel any pending reconnect and close the connection cleanly
    ///
    /// Idempotent.
    pub fn disconnect(&mut self) {
        self.cancel_reconnect();
        self.generation += 1;
        if self.handle.is_some() {
            tracing::info!("Disconnecting");
        }
        self.release_handle(CLOSE_NORMAL, "Client disconnect");
        self.update(|s| {
            let next = match s.state {
                ConnectionState::Idle => ConnectionState::Idle,
                _ => ConnectionState::Closed,
            };
            s.set_state(next);
        });
    }

    /// Serialize `payload` and write it if open; failures land in `last_error`
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        match self.try_send(payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to send message: {}", e);
                self.record_error(&e);
                false
            }
        }
    }

    fn try_send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let handle = match (&self.handle, self.state()) {
            (Some(handle), ConnectionState::Open) => handle,
            _ => return Err(CoreError::NotConnected),
        };
        let text = MessageCodec::encode(payload)?;
        handle.send(text)
    }

    /// Apply one signal; returns decoded messages that need dispatching
    pub fn handle_signal(&mut self, signal: Signal) -> Option<Inbound> {
        match signal {
            Signal::Transport { generation, event } => self.on_transport_event(generation, event),
            Signal::ReconnectDue { generation } => {
                self.on_reconnect_due(generation);
                None
            }
        }
    }

    /// Set `last_message` unless the connection was superseded meanwhile
    pub fn record_message(&self, generation: u64, message: &Message) -> bool {
        if generation != self.generation {
            return false;
        }
        self.update(|s| s.last_message = Some(message.clone()));
        true
    }

    pub fn record_error(&self, error: &CoreError) {
        let text = error.to_string();
        self.update(|s| s.last_error = Some(text));
    }

    fn on_transport_event(&mut self, generation: u64, event: TransportEvent) -> Option<Inbound> {
        if generation != self.generation {
            tracing::debug!("Ignoring {} event from superseded connection", event.label());
            return None;
        }

        match event {
            TransportEvent::Open => {
                tracing::info!("Connection open");
                self.update(|s| {
                    s.set_state(ConnectionState::Open);
                    s.last_error = None;
                    s.attempt_count = 0;
                });
            }
            TransportEvent::Message(text) => {
                if self.state() != ConnectionState::Open {
                    tracing::debug!("Dropping frame received while {:?}", self.state());
                    return None;
                }
                let messages = MessageCodec::decode_frame(&text)
                    .into_iter()
                    .filter_map(|result| match result {
                        Ok(message) => Some(message),
                        Err(e) => {
                            tracing::warn!("Dropping malformed frame: {}", e);
                            None
                        }
                    })
                    .collect();
                return Some(Inbound {
                    generation,
                    messages,
                });
            }
            TransportEvent::Close { was_clean, code } => self.on_close(was_clean, code),
            TransportEvent::Error(info) => {
                tracing::error!("Transport error: {}", info);
                self.update(|s| s.last_error = Some(format!("WebSocket error: {}", info)));
            }
        }
        None
    }

    fn on_close(&mut self, was_clean: bool, code: u16) {
        self.handle = None;
        let attempts = self.status.borrow().attempt_count;

        if was_clean {
            tracing::info!("Connection closed (code {})", code);
            self.update(|s| s.set_state(ConnectionState::Closed));
        } else if self.config.reconnect.allows_attempt(attempts) {
            self.schedule_reconnect(attempts, code);
        } else {
            tracing::error!(
                "Connection lost (code {}), giving up after {} reconnect attempts",
                code,
                attempts
            );
            self.update(|s| {
                s.set_state(ConnectionState::Closed);
                if s.last_error.is_none() {
                    s.last_error = Some(format!(
                        "Connection lost (code {}), reconnect attempts exhausted",
                        code
                    ));
                }
            });
        }
    }

    fn schedule_reconnect(&mut self, attempt: u32, code: u16) {
        let delay = self.config.reconnect.delay(attempt);
        tracing::warn!(
            "Connection lost (code {}), reconnecting in {:?} (attempt {})",
            code,
            delay,
            attempt + 1
        );

        self.cancel_reconnect();
        self.generation += 1;
        let generation = self.generation;
        let signals = self.signals.clone();
        self.reconnect_timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(Signal::ReconnectDue { generation });
        }));

        self.update(|s| {
            s.set_state(ConnectionState::ReconnectPending);
            s.next_reconnect = Some(delay);
        });
    }

    fn on_reconnect_due(&mut self, generation: u64) {
        if generation != self.generation || self.reconnect_timer.take().is_none() {
            tracing::debug!("Ignoring stale reconnect timer");
            return;
        }
        let Some(url) = self.url.clone() else {
            return;
        };

        self.update(|s| s.attempt_count += 1);
        tracing::info!(
            "Reconnecting to {} (attempt {})",
            url,
            self.status.borrow().attempt_count
        );
        self.open(&url);
    }

    /// Open a new handle under a fresh generation
    fn open(&mut self, url: &str) {
        self.generation += 1;
        let generation = self.generation;
        let signals = self.signals.clone();
        let sink = EventSink::new(move |event| {
            let _ = signals.send(Signal::Transport { generation, event });
        });

        self.update(|s| s.set_state(ConnectionState::Connecting));

        // Transports spawn their connection task on our runtime
        let _guard = self.runtime.enter();
        match self.transport.open(url, sink) {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                tracing::error!("Failed to open connection to {}: {}", url, e);
                self.update(|s| {
                    s.set_state(ConnectionState::Closed);
                    s.last_error = Some(e.to_string());
                });
            }
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
            tracing::debug!("Cancelled pending reconnect");
        }
    }

    fn release_handle(&mut self, code: u16, reason: &str) {
        if let Some(mut handle) = self.handle.take() {
            handle.close(code, reason);
        }
    }
}

impl Drop for ConnectionStateMachine {
    fn drop(&mut self) {
        self.cancel_reconnect();
        self.release_handle(CLOSE_GOING_AWAY, "Client dropped");
    }
}

/// Apply signals in arrival order and dispatch decoded messages
///
/// Handlers run with no lock held, so they may call back into the client.
/// A panicking handler ends that message's dispatch pass and is recorded
/// in `last_error`; the connection is unaffected.
pub(crate) async fn run_event_loop(
    machine: Arc<Mutex<ConnectionStateMachine>>,
    registry: Arc<HandlerRegistry>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(inbound) = lock(&machine).handle_signal(signal) else {
            continue;
        };

        for message in inbound.messages {
            if !lock(&machine).record_message(inbound.generation, &message) {
                break;
            }
            let dispatched = panic::catch_unwind(AssertUnwindSafe(|| registry.dispatch(&message)));
            if dispatched.is_err() {
                let err = CoreError::HandlerPanic(message.kind.clone());
                tracing::error!("{}", err);
                lock(&machine).record_error(&err);
            }
        }
    }
    tracing::debug!("Event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn machine(transport: &MockTransport) -> (ConnectionStateMachine, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = ConnectionStateMachine::new(
            Arc::new(transport.clone()),
            ClientConfig::with_url("ws://localhost:8080/ws"),
            Handle::current(),
            tx,
        );
        (machine, rx)
    }

    /// Emit on the mock, then feed the resulting signal to the machine
    fn deliver(
        machine: &mut ConnectionStateMachine,
        rx: &mut mpsc::UnboundedReceiver<Signal>,
        transport: &MockTransport,
        event: TransportEvent,
    ) -> Option<Inbound> {
        transport.emit_latest(event);
        let signal = rx.try_recv().expect("signal");
        machine.handle_signal(signal)
    }

    #[tokio::test]
    async fn test_open_resets_attempts_and_error() {
        let transport = MockTransport::new();
        let (mut sm, mut rx) = machine(&transport);
        sm.connect(None);
        assert_eq!(sm.state(), ConnectionState::Connecting);

        sm.update(|s| {
            s.attempt_count = 3;
            s.last_error = Some("old".into());
        });
        deliver(&mut sm, &mut rx, &transport, TransportEvent::Open);

        let status = sm.watch().borrow().clone();
        assert_eq!(status.state, ConnectionState::Open);
        assert!(status.is_connected);
        assert_eq!(status.attempt_count, 0);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_malformed_frame_yields_no_messages() {
        let transport = MockTransport::new();
        let (mut sm, mut rx) = machine(&transport);
        sm.connect(None);
        deliver(&mut sm, &mut rx, &transport, TransportEvent::Open);

        let inbound = deliver(
            &mut sm,
            &mut rx,
            &transport,
            TransportEvent::Message("{not json".into()),
        )
        .unwrap();
        assert!(inbound.messages.is_empty());
        assert_eq!(sm.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let transport = MockTransport::new();
        let (mut sm, mut rx) = machine(&transport);
        sm.connect(None);
        sm.connect(None);
        assert_eq!(transport.open_count(), 2);
        assert_eq!(transport.close_call(0).map(|c| c.0), Some(CLOSE_NORMAL));

        // Late open from the superseded handle
        transport.emit(0, TransportEvent::Open);
        let signal = rx.try_recv().unwrap();
        assert!(sm.handle_signal(signal).is_none());
        assert_eq!(sm.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_unclean_close_schedules_backoff_delay() {
        let transport = MockTransport::new();
        let (mut sm, mut rx) = machine(&transport);
        sm.connect(None);
        deliver(&mut sm, &mut rx, &transport, TransportEvent::Open);
        deliver(&mut sm, &mut rx, &transport, TransportEvent::abnormal_close());

        let status = sm.watch().borrow().clone();
        assert_eq!(status.state, ConnectionState::ReconnectPending);
        assert_eq!(status.next_reconnect, Some(Duration::from_millis(1000)));
        assert!(sm.reconnect_timer.is_some());
    }

    #[tokio::test]
    async fn test_clean_close_is_terminal() {
        let transport = MockTransport::new();
        let (mut sm, mut rx) = machine(&transport);
        sm.connect(None);
        deliver(&mut sm, &mut rx, &transport, TransportEvent::Open);
        deliver(&mut sm, &mut rx, &transport, TransportEvent::clean_close(1000));

        assert_eq!(sm.state(), ConnectionState::Closed);
        assert!(sm.reconnect_timer.is_none());
    }

    #[tokio::test]
    async fn test_error_event_does_not_change_state() {
        let transport = MockTransport::new();
        let (mut sm, mut rx) = machine(&transport);
        sm.connect(None);
        deliver(&mut sm, &mut rx, &transport, TransportEvent::Open);
        deliver(&mut sm, &mut rx, &transport, TransportEvent::Error("boom".into()));

        let status = sm.watch().borrow().clone();
        assert_eq!(status.state, ConnectionState::Open);
        assert_eq!(status.last_error.as_deref(), Some("WebSocket error: boom"));
    }

    #[tokio::test]
    async fn test_stale_reconnect_timer_is_ignored() {
        let transport = MockTransport::new();
        let (mut sm, mut rx) = machine(&transport);
        sm.connect(None);
        deliver(&mut sm, &mut rx, &transport, TransportEvent::Open);
        deliver(&mut sm, &mut rx, &transport, TransportEvent::abnormal_close());
        let stale = sm.generation;

        sm.disconnect();
        sm.handle_signal(Signal::ReconnectDue { generation: stale });
        assert_eq!(transport.open_count(), 1);
        assert_eq!(sm.state(), ConnectionState::Closed);
    }
}
