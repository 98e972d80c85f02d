//! TCP accept loop.
//!
//! [`Listener::bind`] binds the socket immediately so callers can learn
//! the actual address before serving, which is what lets tests bind port
//! 0 and connect to whatever the OS picked. [`Listener::run`] then
//! accepts until the shared running flag drops, spawning one session
//! task per connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::session::handle_connection;

/// How long one `accept` call may block before the running flag is
/// rechecked. Bounds shutdown latency.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A bound rendezvous server, ready to accept peers.
pub struct Listener {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    config: ServerConfig,
}

impl Listener {
    /// Binds the configured address and prepares a fresh registry.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound, typically because the port
    /// is already taken or privileged.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        Ok(Self {
            listener,
            registry: ConnectionRegistry::new(),
            config,
        })
    }

    /// The address actually bound, with the OS-assigned port resolved.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read bound address")
    }

    /// The registry shared with every session this listener spawns.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until `running` is cleared.
    ///
    /// Each accepted connection runs in its own task; a failing session
    /// never takes the accept loop down with it. In-flight sessions are
    /// not awaited on shutdown, their sockets close when the process
    /// exits or the tasks finish.
    pub async fn run(self, running: Arc<AtomicBool>) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, max_frame_len = self.config.max_frame_len, "listening");

        while running.load(Ordering::Relaxed) {
            let accepted = match timeout(ACCEPT_POLL_INTERVAL, self.listener.accept()).await {
                Ok(result) => result,
                // Timeout: no connection arrived, recheck the flag.
                Err(_) => continue,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let registry = Arc::clone(&self.registry);
                    let max_frame_len = self.config.max_frame_len;
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, registry, max_frame_len).await;
                    });
                }
                Err(e) => {
                    // Transient accept errors (e.g. EMFILE) should not
                    // kill the server.
                    warn!(error = %e, "accept failed");
                }
            }
        }

        info!(%addr, "listener stopped");
        Ok(())
    }
}
