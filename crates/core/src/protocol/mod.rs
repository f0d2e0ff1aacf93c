//! Wire protocol for live-event frames

mod codec;

pub use codec::{MessageCodec, MAX_FRAME_SIZE};
