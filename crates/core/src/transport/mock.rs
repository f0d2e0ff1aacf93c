//! In-memory transport for tests
//!
//! Records every connection the client opens and lets the test drive
//! lifecycle events on any of them.

use std::sync::{Arc, Mutex};

use super::{validate_url, EventSink, Transport, TransportHandle};
use crate::types::TransportEvent;
use crate::{lock, CoreError, Result};

/// One recorded connection attempt
#[derive(Debug)]
struct MockConnection {
    url: String,
    events: EventSink,
    sent: Vec<String>,
    closed: Option<(u16, String)>,
}

#[derive(Debug, Default)]
struct MockState {
    connections: Vec<MockConnection>,
    fail_next_open: Option<String>,
}

/// Mock transport for testing
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail as a construction error
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        lock(&self.state).fail_next_open = Some(reason.into());
    }

    /// Number of connections opened so far
    pub fn open_count(&self) -> usize {
        lock(&self.state).connections.len()
    }

    /// URLs of all opened connections, in order
    pub fn opened_urls(&self) -> Vec<String> {
        lock(&self.state)
            .connections
            .iter()
            .map(|c| c.url.clone())
            .collect()
    }

    /// Frames sent on connection `index`
    pub fn sent(&self, index: usize) -> Vec<String> {
        lock(&self.state)
            .connections
            .get(index)
            .map(|c| c.sent.clone())
            .unwrap_or_default()
    }

    /// Frames sent across all connections
    pub fn total_sent(&self) -> usize {
        lock(&self.state)
            .connections
            .iter()
            .map(|c| c.sent.len())
            .sum()
    }

    /// Close code and reason passed to `close` on connection `index`
    pub fn close_call(&self, index: usize) -> Option<(u16, String)> {
        lock(&self.state)
            .connections
            .get(index)
            .and_then(|c| c.closed.clone())
    }

    /// Deliver an event as if connection `index` produced it
    pub fn emit(&self, index: usize, event: TransportEvent) {
        // Clone the sink so the state lock is not held while delivering
        let sink = lock(&self.state)
            .connections
            .get(index)
            .map(|c| c.events.clone());
        match sink {
            Some(sink) => sink.emit(event),
            None => tracing::warn!("MockTransport has no connection #{}", index),
        }
    }

    /// Deliver an event on the most recently opened connection
    pub fn emit_latest(&self, event: TransportEvent) {
        let count = self.open_count();
        if count > 0 {
            self.emit(count - 1, event);
        }
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &str, events: EventSink) -> Result<Box<dyn TransportHandle>> {
        validate_url(url)?;

        let mut state = lock(&self.state);
        if let Some(reason) = state.fail_next_open.take() {
            return Err(CoreError::Connection(reason));
        }

        state.connections.push(MockConnection {
            url: url.to_string(),
            events,
            sent: Vec::new(),
            closed: None,
        });

        Ok(Box::new(MockHandle {
            index: state.connections.len() - 1,
            state: self.state.clone(),
        }))
    }
}

struct MockHandle {
    index: usize,
    state: Arc<Mutex<MockState>>,
}

impl TransportHandle for MockHandle {
    fn send(&self, text: String) -> Result<()> {
        let mut state = lock(&self.state);
        let conn = &mut state.connections[self.index];
        if conn.closed.is_some() {
            return Err(CoreError::NotConnected);
        }
        conn.sent.push(text);
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        lock(&self.state).connections[self.index].closed = Some((code, reason.to_string()));
    }
}
