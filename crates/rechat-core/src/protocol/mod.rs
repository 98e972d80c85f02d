//! Protocol module containing the message types and the frame codec.

pub mod codec;
pub mod messages;

pub use codec::{encode_frame, read_frame, write_frame, ProtocolError};
pub use messages::*;
