//! # rechat-core
//!
//! Shared wire protocol for the ReChat messaging fabric: the structured
//! message types exchanged between peers and the length-prefixed frame
//! codec that carries them over TCP.
//!
//! This crate is used by both the rendezvous server and the client.
//! It has zero dependencies on sockets beyond the generic `tokio::io`
//! traits, and no OS or UI APIs.
//!
//! The two modules:
//!
//! - **`protocol::messages`** – the `WireMessage` enum (`hello`, `roster`,
//!   `presence`, `msg`, `img`, …) and its JSON field layout.
//! - **`protocol::codec`** – framing: every message travels as a 4-byte
//!   big-endian length prefix followed by that many bytes of UTF-8 JSON.

pub mod protocol;

// Re-export the most-used items at the crate root so callers can write
// `rechat_core::WireMessage` instead of the full module path.
pub use protocol::codec::{
    encode_frame, read_frame, write_frame, ProtocolError, DEFAULT_MAX_FRAME_LEN,
};
pub use protocol::messages::{decode_image_data, now_ts, PresenceEvent, RosterEntry, WireMessage};
