//! # rechat-server
//!
//! The ReChat rendezvous server. Peers connect over TCP, present a
//! self-declared identity in a `hello` frame, and from then on can
//! broadcast chat/image messages to everyone, route them to one named
//! peer, and query who is currently online.
//!
//! Module layout:
//!
//! - **`config`** – [`ServerConfig`]: bind address and frame-size limit.
//! - **`registry`** – [`ConnectionRegistry`]: the single source of truth
//!   for who is connected, shared by all session handlers.
//! - **`session`** – per-connection protocol state machine
//!   (`AwaitingHello → Active → Closed`), one Tokio task per connection.
//! - **`listener`** – [`Listener`]: the accept loop.
//!
//! The registry is the only state shared across tasks; each handler owns
//! its socket's read half exclusively, and write halves are shared only
//! through the registry so broadcasts and routed deliveries serialize
//! per connection.

pub mod config;
pub mod listener;
pub mod registry;
pub mod session;

pub use config::ServerConfig;
pub use listener::Listener;
pub use registry::{ConnId, ConnectionRegistry};
