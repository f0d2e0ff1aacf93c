//! Domain types for the live-event client

mod event;
mod message;

pub use event::{TransportEvent, CLOSE_ABNORMAL, CLOSE_NORMAL};
pub use message::Message;
