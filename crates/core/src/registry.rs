//! Message handler registry
//!
//! Maps a message type tag to an ordered list of handlers, plus the
//! wildcard tag [`WILDCARD`] whose handlers see every message. Insertion
//! order is dispatch order and the same handler may be registered more
//! than once.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::lock;
use crate::types::Message;

/// Tag whose handlers receive every dispatched message
pub const WILDCARD: &str = "*";

/// Message callback
///
/// Equality is identity: two `Handler`s are equal only if one is a clone
/// of the other.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(&Message) + Send + Sync>);

impl Handler {
    pub fn new(f: impl Fn(&Message) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Invoke the callback
    pub fn call(&self, message: &Message) {
        (self.0)(message)
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Type tag → handlers
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `kind`
    pub fn subscribe(&self, kind: impl Into<String>, handler: Handler) {
        lock(&self.handlers)
            .entry(kind.into())
            .or_default()
            .push(handler);
    }

    /// Remove the first registration of `handler` under `kind`
    ///
    /// Returns whether anything was removed.
    pub fn unsubscribe(&self, kind: &str, handler: &Handler) -> bool {
        let mut handlers = lock(&self.handlers);
        let Some(list) = handlers.get_mut(kind) else {
            return false;
        };
        let Some(pos) = list.iter().position(|h| h == handler) else {
            return false;
        };

        list.remove(pos);
        if list.is_empty() {
            handlers.remove(kind);
        }
        true
    }

    /// Remove every handler for `kind`, or every handler when `kind` is None
    pub fn clear(&self, kind: Option<&str>) {
        let mut handlers = lock(&self.handlers);
        match kind {
            Some(kind) => {
                handlers.remove(kind);
            }
            None => handlers.clear(),
        }
    }

    /// Number of registrations under `kind`
    pub fn handler_count(&self, kind: &str) -> usize {
        lock(&self.handlers).get(kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.handlers).is_empty()
    }

    /// Invoke type handlers, then wildcard handlers, in registration order
    ///
    /// The lists are snapshotted first: handlers may subscribe or
    /// unsubscribe while running without affecting this pass. Panics
    /// propagate to the caller. Returns the number of handlers invoked.
    pub fn dispatch(&self, message: &Message) -> usize {
        let snapshot: Vec<Handler> = {
            let handlers = lock(&self.handlers);
            let typed = handlers.get(&message.kind).into_iter().flatten();
            let wildcard = handlers.get(WILDCARD).into_iter().flatten();
            typed.chain(wildcard).cloned().collect()
        };

        tracing::trace!("Dispatching '{}' to {} handler(s)", message.kind, snapshot.len());
        for handler in &snapshot {
            handler.call(message);
        }
        snapshot.len()
    }
}
