//! ReChat rendezvous server binary.
//!
//! ```bash
//! rechat-server --bind 0.0.0.0 --port 6000
//! RUST_LOG=debug rechat-server
//! ```

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rechat_core::DEFAULT_MAX_FRAME_LEN;
use rechat_server::config::DEFAULT_PORT;
use rechat_server::{Listener, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "rechat-server", about = "ReChat rendezvous server", version)]
struct Cli {
    /// Interface to bind.
    #[arg(long, env = "RECHAT_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// TCP port to listen on.
    #[arg(long, env = "RECHAT_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum accepted frame payload size in bytes.
    #[arg(long, env = "RECHAT_MAX_FRAME_LEN", default_value_t = DEFAULT_MAX_FRAME_LEN)]
    max_frame_len: u32,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: (self.bind, self.port).into(),
            max_frame_len: self.max_frame_len,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Cli::parse().into_config();
    let listener = Listener::bind(config).await.context("startup failed")?;

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrlc = Arc::clone(&running);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, shutting down");
        running_ctrlc.store(false, Ordering::Relaxed);
    });

    listener.run(running).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
