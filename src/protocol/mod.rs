//! Wire protocol between the network sink and the network source
//!
//! A connection carries a plain sequence of length-prefixed frames, each
//! holding one JSON-encoded `Event`. No negotiation, authentication or
//! compression.

mod frame;

pub use frame::{
    decode_frame, encode_frame, FrameError, FrameReader, FrameWriter, LENGTH_PREFIX_SIZE,
    MAX_FRAME_SIZE,
};
