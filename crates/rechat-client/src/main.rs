//! ReChat terminal client.
//!
//! ```bash
//! rechat-client --host chat.example.com --name alice
//! ```
//!
//! Lines typed at the prompt are broadcast to every peer. Commands:
//!
//! ```text
//! /to <peer> <text>      send to one peer
//! /img <path> [peer]     send an image file, broadcast unless peer given
//! /roster                ask who is online
//! /quit                  leave
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use rechat_client::{ChatSession, ClientConfig, Identity, IdentityStore, TomlIdentityStore};
use rechat_core::{decode_image_data, PresenceEvent, WireMessage};

#[derive(Parser, Debug)]
#[command(name = "rechat-client", about = "ReChat terminal client", version)]
struct Cli {
    /// Rendezvous server host.
    #[arg(long, env = "RECHAT_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Rendezvous server port.
    #[arg(long, env = "RECHAT_PORT", default_value_t = 6000)]
    port: u16,

    /// Peer id; overrides the identity file.
    #[arg(long, env = "RECHAT_ID")]
    id: Option<String>,

    /// Display name; overrides the identity file.
    #[arg(long, env = "RECHAT_NAME")]
    name: Option<String>,

    /// Where the identity is persisted between runs.
    #[arg(long, env = "RECHAT_IDENTITY_FILE", default_value = "rechat-identity.toml")]
    identity_file: PathBuf,

    /// Maximum accepted frame payload size in bytes.
    #[arg(long, env = "RECHAT_MAX_FRAME_LEN", default_value_t = rechat_core::DEFAULT_MAX_FRAME_LEN)]
    max_frame_len: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let store = TomlIdentityStore::new(&cli.identity_file);
    let identity = resolve_identity(&store, cli.id.clone(), cli.name.clone())?;

    let mut config = ClientConfig::new(format!("{}:{}", cli.host, cli.port), identity.id);
    config.name = identity.name;
    config.max_frame_len = cli.max_frame_len;

    println!("* you are '{}', connecting to {}", config.identity(), config.server_addr);

    let session = ChatSession::new(config);
    let handle = session.start(print_event);

    run_prompt(&session).await?;

    session.stop();
    handle.await.context("session task panicked")?;
    Ok(())
}

/// Merges CLI-provided identity fields over the stored ones and writes
/// the result back so the next run reuses it.
fn resolve_identity(
    store: &impl IdentityStore,
    cli_id: Option<String>,
    cli_name: Option<String>,
) -> Result<Identity> {
    let stored = store.load().context("failed to load identity")?;
    let id = cli_id
        .or_else(|| stored.as_ref().map(|s| s.id.clone()))
        .unwrap_or_else(generate_id);
    let name = cli_name.or_else(|| stored.and_then(|s| s.name));

    let identity = Identity { id, name };
    if let Err(e) = store.save(&identity) {
        // Persisting is a convenience; the session works without it.
        warn!(error = %e, "could not save identity file");
    }
    Ok(identity)
}

/// First-run id: best-effort unique without asking the user anything.
fn generate_id() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "peer".to_string());
    format!("{user}-{}", std::process::id())
}

// ── Inbound events ────────────────────────────────────────────────────────────

fn print_event(event: rechat_client::SessionEvent) {
    use rechat_client::SessionEvent;
    match event {
        SessionEvent::Connected { server_addr } => println!("* connected to {server_addr}"),
        SessionEvent::Disconnected => println!("* disconnected, retrying"),
        SessionEvent::Message(msg) => print_message(msg),
    }
}

fn print_message(msg: WireMessage) {
    match msg {
        WireMessage::Roster { list } => {
            let ids: Vec<&str> = list.iter().map(|e| e.id.as_str()).collect();
            println!("* online: {}", ids.join(", "));
        }
        WireMessage::Presence { event, id, name } => {
            let who = name.unwrap_or(id);
            match event {
                PresenceEvent::Online => println!("* {who} joined"),
                PresenceEvent::Offline => println!("* {who} left"),
            }
        }
        WireMessage::Msg { from, to, body, .. } => {
            if to.as_deref().is_some_and(|t| !t.is_empty()) {
                println!("[{from} \u{2192} you] {body}");
            } else {
                println!("[{from}] {body}");
            }
        }
        WireMessage::Img { from, data, name, .. } => save_image(&from, &name, &data),
        // hello/presence_req never arrive client-side; unknown types are
        // newer-peer traffic we cannot render.
        other => warn!(kind = other.type_name(), "ignoring unexpected frame"),
    }
}

/// Writes a received image to the temp directory. A bad payload or a
/// full disk costs us one image, not the session.
fn save_image(from: &str, name: &str, data: &str) {
    let bytes = match decode_image_data(data) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(from, name, error = %e, "discarding image with invalid base64");
            return;
        }
    };
    // Use only the final path component so a malicious name cannot
    // escape the temp directory.
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image.bin");
    let sender = from.replace(['/', '\\'], "_");
    let path = std::env::temp_dir().join(format!("rechat-{sender}-{file_name}"));
    match std::fs::write(&path, &bytes) {
        Ok(()) => println!("* {from} sent '{name}', saved to {}", path.display()),
        Err(e) => warn!(from, name, error = %e, "failed to save image"),
    }
}

// ── Prompt loop ───────────────────────────────────────────────────────────────

async fn run_prompt(session: &ChatSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            line = lines.next_line() => {
                let Some(line) = line.context("stdin read failed")? else {
                    return Ok(());
                };
                if !handle_line(session, line.trim()).await {
                    return Ok(());
                }
            }
        }
    }
}

/// Interprets one prompt line. Returns `false` when the user quits.
async fn handle_line(session: &ChatSession, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    let sent = if line == "/quit" {
        return false;
    } else if line == "/roster" {
        session.request_roster().await
    } else if let Some(rest) = line.strip_prefix("/to ") {
        match rest.split_once(' ') {
            Some((peer, text)) if !text.trim().is_empty() => {
                session
                    .send_text(text.trim().to_string(), Some(peer.to_string()))
                    .await
            }
            _ => {
                println!("* usage: /to <peer> <text>");
                return true;
            }
        }
    } else if let Some(rest) = line.strip_prefix("/img ") {
        // Path must not contain spaces; anything after the first space
        // is the target peer.
        let (path, peer) = match rest.split_once(' ') {
            Some((path, peer)) => (path, Some(peer.trim().to_string())),
            None => (rest, None),
        };
        send_image_file(session, path.trim(), peer).await
    } else if line.starts_with('/') {
        println!("* commands: /to <peer> <text>, /img <path> [peer], /roster, /quit");
        return true;
    } else {
        session.send_text(line.to_string(), None).await
    };

    if !sent {
        println!("* not connected, message dropped");
    }
    true
}

async fn send_image_file(session: &ChatSession, path: &str, peer: Option<String>) -> bool {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            println!("* cannot read '{path}': {e}");
            return true;
        }
    };
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image.bin")
        .to_string();
    session.send_image(&bytes, name, peer).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
