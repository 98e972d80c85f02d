//! # rechat-client
//!
//! Client-side building blocks for ReChat:
//!
//! - **`session`** – [`ChatSession`]: a reconnecting connection to the
//!   rendezvous server that feeds inbound events to a consumer callback.
//! - **`identity`** – persistence for the peer's self-declared identity.
//!
//! The terminal chat binary in `main.rs` wires these together; other
//! frontends can use the library directly.

pub mod identity;
pub mod session;

pub use identity::{Identity, IdentityStore, TomlIdentityStore};
pub use session::{ChatSession, ClientConfig, SessionEvent};
