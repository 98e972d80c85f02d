//! Per-connection protocol state machine.
//!
//! A connection moves through three states:
//!
//! ```text
//! AwaitingHello ──hello──▶ Active ──disconnect/error──▶ Closed
//!       │
//!       └── anything else ──▶ Closed (never registered)
//! ```
//!
//! One handler task owns each connection's read half for its whole life.
//! The write half is surrendered to the registry at registration, so the
//! handler replies through the registry like everyone else.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use rechat_core::{read_frame, ProtocolError, WireMessage};

use crate::registry::{ConnId, ConnectionRegistry};

/// Drives one peer connection from accept to close.
///
/// Never returns an error: every failure mode ends the same way, with
/// the connection closed and, if the peer was registered, its departure
/// announced.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    max_frame_len: u32,
) {
    let (mut read_half, write_half) = stream.into_split();

    // AwaitingHello: the first frame must be a well-formed hello, or the
    // connection is dropped without ever appearing in the roster.
    let (hello_id, identity) = match read_frame(&mut read_half, max_frame_len).await {
        Ok(Some(WireMessage::Hello { id, name })) if !id.is_empty() => {
            let identity = name.filter(|n| !n.is_empty()).unwrap_or_else(|| id.clone());
            (id, identity)
        }
        Ok(Some(other)) => {
            warn!(%addr, kind = other.type_name(), "expected hello as first frame, closing");
            return;
        }
        Ok(None) => {
            debug!(%addr, "peer disconnected before hello");
            return;
        }
        Err(e) => {
            warn!(%addr, error = %e, "protocol error before hello, closing");
            return;
        }
    };

    let conn_id = registry
        .register(addr, identity.clone(), hello_id, write_half)
        .await;
    info!(conn_id, peer = %identity, %addr, "peer joined");

    // Active: the newcomer gets the roster (including itself), everyone
    // else learns of the arrival.
    let roster = registry.snapshot_roster().await;
    registry.send_to_conn(conn_id, &roster).await;
    registry.announce_online(conn_id).await;

    if let Err(e) = active_loop(&mut read_half, conn_id, &identity, &registry, max_frame_len).await
    {
        warn!(conn_id, peer = %identity, error = %e, "session ended on protocol error");
    }

    // Closed: the registry may already have pruned this connection if a
    // write to it failed first; unregister tells us whether the offline
    // announcement is still ours to make.
    if let Some(identity) = registry.unregister(conn_id).await {
        info!(conn_id, peer = %identity, "peer left");
        registry.announce_offline(identity).await;
    }
}

/// Reads and dispatches frames until the peer disconnects or violates
/// the protocol.
async fn active_loop(
    read_half: &mut OwnedReadHalf,
    conn_id: ConnId,
    identity: &str,
    registry: &Arc<ConnectionRegistry>,
    max_frame_len: u32,
) -> Result<(), ProtocolError> {
    loop {
        let Some(frame) = read_frame(read_half, max_frame_len).await? else {
            return Ok(());
        };

        match frame {
            msg @ (WireMessage::Msg { .. } | WireMessage::Img { .. }) => {
                match msg.target() {
                    Some(target) => {
                        // Delivery failure (unknown target or dead
                        // socket) is invisible to the sender.
                        registry.send_to_identity(target, &msg).await;
                    }
                    None => registry.broadcast(&msg, Some(conn_id)).await,
                }
            }
            WireMessage::PresenceReq => {
                let roster = registry.snapshot_roster().await;
                registry.send_to_conn(conn_id, &roster).await;
            }
            WireMessage::Hello { .. } => {
                // A second hello does not rename the peer.
                debug!(conn_id, peer = %identity, "ignoring repeated hello");
            }
            other => {
                debug!(
                    conn_id,
                    peer = %identity,
                    kind = other.type_name(),
                    "ignoring unexpected frame"
                );
            }
        }
    }
}
