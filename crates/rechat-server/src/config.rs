//! Server configuration.
//!
//! [`ServerConfig`] is a plain struct with no global state; the binary
//! populates it from CLI arguments and environment variables, tests build
//! it directly (usually with port 0 for an ephemeral bind).

use std::net::SocketAddr;

use rechat_core::DEFAULT_MAX_FRAME_LEN;

/// Default TCP port peers connect to.
pub const DEFAULT_PORT: u16 = 6000;

/// All runtime configuration for the rendezvous server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address and port the listener binds to.
    ///
    /// `0.0.0.0` accepts connections from any interface; use `127.0.0.1`
    /// to accept only local peers.
    pub bind_addr: SocketAddr,

    /// Upper bound on the declared length of any inbound frame.
    ///
    /// A peer whose frame exceeds this is disconnected.
    pub max_frame_len: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // Compile-time-known valid address string.
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}").parse().unwrap(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
