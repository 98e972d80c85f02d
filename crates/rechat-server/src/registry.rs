//! Connection registry: the shared view of every live peer.
//!
//! Each accepted connection gets a [`ConnId`] at registration and a
//! [`PeerRecord`] holding its remote address, declared identity, and the
//! write half of its socket. Session handlers keep the read half to
//! themselves; all outbound traffic goes through the registry so writes
//! to one peer serialize.
//!
//! Delivery is best effort per recipient. A failed write to one peer
//! never aborts delivery to the others; the failed peer is pruned and its
//! departure announced, exactly as if it had disconnected on its own.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use rechat_core::{encode_frame, PresenceEvent, RosterEntry, WireMessage};

/// Registry-assigned identifier for one TCP connection.
///
/// Distinct from the peer's self-declared identity: identities may
/// collide, connection ids never do.
pub type ConnId = u64;

/// Everything the registry tracks about one connected peer.
struct PeerRecord {
    /// Remote socket address, reported in roster entries.
    addr: SocketAddr,
    /// Self-declared identity: the hello `name` if present, else the
    /// hello `id`.
    identity: String,
    /// The hello `id`, announced in the online presence event.
    hello_id: String,
    /// Shared write half. Locked per write so concurrent broadcasts and
    /// routed sends never interleave bytes on one socket.
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

/// Shared registry of live connections.
///
/// Cheap to clone via [`Arc`]; the listener creates one and hands it to
/// every session handler.
pub struct ConnectionRegistry {
    peers: Mutex<BTreeMap<ConnId, PeerRecord>>,
    next_conn_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(BTreeMap::new()),
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Adds a peer that has completed its hello and returns its [`ConnId`].
    ///
    /// Identity collisions are allowed: two peers may register the same
    /// identity, and routed messages go to whichever registered first.
    pub async fn register(
        self: &Arc<Self>,
        addr: SocketAddr,
        identity: String,
        hello_id: String,
        writer: OwnedWriteHalf,
    ) -> ConnId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let record = PeerRecord {
            addr,
            identity,
            hello_id,
            writer: Arc::new(Mutex::new(writer)),
        };
        let mut peers = self.peers.lock().await;
        debug!(conn_id, peer = %record.identity, %addr, "peer registered");
        peers.insert(conn_id, record);
        conn_id
    }

    /// Removes a peer and returns its identity, or `None` if it was
    /// already removed.
    ///
    /// Both the session handler and broadcast pruning can race to remove
    /// the same connection; the `Option` makes the removal exactly-once,
    /// so the offline announcement is too.
    pub async fn unregister(self: &Arc<Self>, conn_id: ConnId) -> Option<String> {
        let mut peers = self.peers.lock().await;
        let record = peers.remove(&conn_id)?;
        debug!(conn_id, peer = %record.identity, "peer unregistered");
        Some(record.identity)
    }

    /// Number of currently registered peers.
    pub async fn peer_count(self: &Arc<Self>) -> usize {
        self.peers.lock().await.len()
    }

    /// Builds a roster message reflecting the current membership.
    ///
    /// Entries appear in registration order. The moment the lock is
    /// released the snapshot can go stale; peers reconcile via the
    /// presence events that follow every membership change.
    pub async fn snapshot_roster(self: &Arc<Self>) -> WireMessage {
        let peers = self.peers.lock().await;
        let list = peers
            .values()
            .map(|record| RosterEntry {
                id: record.identity.clone(),
                addr: record.addr.ip().to_string(),
            })
            .collect();
        WireMessage::Roster { list }
    }

    /// Sends `msg` to the one peer whose identity equals `target`.
    ///
    /// Returns `true` if a matching peer existed and the write succeeded.
    /// An unknown target is silently dropped apart from a log line; the
    /// sender gets no bounce. If identities collide, the first-registered
    /// peer wins.
    pub async fn send_to_identity(self: &Arc<Self>, target: &str, msg: &WireMessage) -> bool {
        let bytes = match encode_frame(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound frame");
                return false;
            }
        };

        let found = {
            let peers = self.peers.lock().await;
            peers
                .iter()
                .find(|(_, record)| record.identity == target)
                .map(|(&conn_id, record)| (conn_id, Arc::clone(&record.writer)))
        };

        let Some((conn_id, writer)) = found else {
            debug!(target, kind = msg.type_name(), "dropping frame for unknown target");
            return false;
        };

        if let Err(e) = writer.lock().await.write_all(&bytes).await {
            warn!(conn_id, target, error = %e, "routed send failed, pruning peer");
            self.prune_and_announce(vec![conn_id]).await;
            return false;
        }
        true
    }

    /// Sends `msg` to one specific connection.
    ///
    /// Unlike [`send_to_identity`] this cannot be misrouted by an
    /// identity collision; session handlers use it for replies that must
    /// reach exactly the requesting socket, like roster responses.
    ///
    /// [`send_to_identity`]: ConnectionRegistry::send_to_identity
    pub async fn send_to_conn(self: &Arc<Self>, conn_id: ConnId, msg: &WireMessage) -> bool {
        let bytes = match encode_frame(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound frame");
                return false;
            }
        };

        let writer = {
            let peers = self.peers.lock().await;
            peers.get(&conn_id).map(|record| Arc::clone(&record.writer))
        };
        let Some(writer) = writer else {
            return false;
        };

        if let Err(e) = writer.lock().await.write_all(&bytes).await {
            warn!(conn_id, error = %e, "direct send failed, pruning peer");
            self.prune_and_announce(vec![conn_id]).await;
            return false;
        }
        true
    }

    /// Broadcasts `msg` to every registered peer except `exclude`.
    ///
    /// Peers whose writes fail are pruned and their departure broadcast
    /// to the survivors.
    pub async fn broadcast(self: &Arc<Self>, msg: &WireMessage, exclude: Option<ConnId>) {
        let bytes = match encode_frame(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode broadcast frame");
                return;
            }
        };
        let failed = self.broadcast_encoded(&bytes, exclude).await;
        self.prune_and_announce(failed).await;
    }

    /// Writes pre-encoded bytes to every peer except `exclude`, returning
    /// the connections whose writes failed.
    ///
    /// The peer map lock is held only long enough to snapshot the write
    /// halves; socket I/O happens outside it so one slow peer cannot
    /// stall registration or other broadcasts' snapshots.
    async fn broadcast_encoded(
        self: &Arc<Self>,
        bytes: &[u8],
        exclude: Option<ConnId>,
    ) -> Vec<ConnId> {
        let targets: Vec<(ConnId, Arc<Mutex<OwnedWriteHalf>>)> = {
            let peers = self.peers.lock().await;
            peers
                .iter()
                .filter(|(&conn_id, _)| Some(conn_id) != exclude)
                .map(|(&conn_id, record)| (conn_id, Arc::clone(&record.writer)))
                .collect()
        };

        let mut failed = Vec::new();
        for (conn_id, writer) in targets {
            if let Err(e) = writer.lock().await.write_all(bytes).await {
                warn!(conn_id, error = %e, "broadcast write failed, pruning peer");
                failed.push(conn_id);
            }
        }
        failed
    }

    /// Removes the given connections and announces each departure.
    ///
    /// A departure announcement can itself reveal further dead peers, so
    /// this loops until no write fails. Iterative rather than recursive:
    /// async recursion needs boxing and the worklist reads better.
    async fn prune_and_announce(self: &Arc<Self>, mut dead: Vec<ConnId>) {
        while let Some(conn_id) = dead.pop() {
            let Some(identity) = self.unregister(conn_id).await else {
                continue;
            };
            let offline = WireMessage::Presence {
                event: PresenceEvent::Offline,
                id: identity,
                name: None,
            };
            match encode_frame(&offline) {
                Ok(bytes) => {
                    let mut failed = self.broadcast_encoded(&bytes, None).await;
                    dead.append(&mut failed);
                }
                Err(e) => warn!(error = %e, "failed to encode offline presence"),
            }
        }
    }

    /// Announces a peer's departure to everyone still connected.
    ///
    /// Called by the session handler after a successful [`unregister`];
    /// the identity comes from that call so the announcement matches what
    /// the registry actually removed.
    ///
    /// [`unregister`]: ConnectionRegistry::unregister
    pub async fn announce_offline(self: &Arc<Self>, identity: String) {
        let offline = WireMessage::Presence {
            event: PresenceEvent::Offline,
            id: identity,
            name: None,
        };
        self.broadcast(&offline, None).await;
    }

    /// Announces a newly registered peer to everyone else.
    pub async fn announce_online(self: &Arc<Self>, conn_id: ConnId) {
        let announcement = {
            let peers = self.peers.lock().await;
            peers.get(&conn_id).map(|record| WireMessage::Presence {
                event: PresenceEvent::Online,
                id: record.hello_id.clone(),
                name: Some(record.identity.clone()),
            })
        };
        if let Some(msg) = announcement {
            self.broadcast(&msg, Some(conn_id)).await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rechat_core::{read_frame, DEFAULT_MAX_FRAME_LEN};
    use tokio::net::{TcpListener, TcpStream};

    /// Makes a connected socket pair and returns the server-side write
    /// half plus the client-side stream for observing delivery.
    async fn socket_pair() -> (OwnedWriteHalf, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer_addr) = listener.accept().await.unwrap();
        let (_, write_half) = server_side.into_split();
        (write_half, client, peer_addr)
    }

    #[tokio::test]
    async fn test_roster_lists_peers_in_registration_order() {
        let registry = ConnectionRegistry::new();
        let (w1, _c1, a1) = socket_pair().await;
        let (w2, _c2, a2) = socket_pair().await;
        registry
            .register(a1, "alice".into(), "alice@pc".into(), w1)
            .await;
        registry
            .register(a2, "bob".into(), "bob@pc".into(), w2)
            .await;

        let WireMessage::Roster { list } = registry.snapshot_roster().await else {
            panic!("expected roster");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "alice");
        assert_eq!(list[1].id, "bob");
        assert_eq!(list[0].addr, a1.ip().to_string());
    }

    #[tokio::test]
    async fn test_unregister_is_exactly_once() {
        let registry = ConnectionRegistry::new();
        let (w, _c, a) = socket_pair().await;
        let conn_id = registry
            .register(a, "alice".into(), "alice@pc".into(), w)
            .await;

        assert_eq!(registry.unregister(conn_id).await.as_deref(), Some("alice"));
        assert_eq!(registry.unregister(conn_id).await, None);
        assert_eq!(registry.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_routed_send_prefers_first_registered_on_collision() {
        let registry = ConnectionRegistry::new();
        let (w1, mut c1, a1) = socket_pair().await;
        let (w2, mut c2, a2) = socket_pair().await;
        registry
            .register(a1, "twin".into(), "first@pc".into(), w1)
            .await;
        registry
            .register(a2, "twin".into(), "second@pc".into(), w2)
            .await;

        let msg = WireMessage::Msg {
            from: "alice".into(),
            to: Some("twin".into()),
            body: "hi".into(),
            ts: 1.0,
        };
        assert!(registry.send_to_identity("twin", &msg).await);

        let delivered = read_frame(&mut c1, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, msg);

        // The later twin must receive nothing; prove it by closing the
        // writer side and checking the stream ends without a frame.
        drop(registry);
        assert!(read_frame(&mut c2, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_send_to_unknown_identity_returns_false() {
        let registry = ConnectionRegistry::new();
        let msg = WireMessage::Msg {
            from: "alice".into(),
            to: Some("ghost".into()),
            body: "anyone there".into(),
            ts: 1.0,
        };
        assert!(!registry.send_to_identity("ghost", &msg).await);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_the_sender() {
        let registry = ConnectionRegistry::new();
        let (w1, mut c1, a1) = socket_pair().await;
        let (w2, mut c2, a2) = socket_pair().await;
        let alice = registry
            .register(a1, "alice".into(), "alice@pc".into(), w1)
            .await;
        registry
            .register(a2, "bob".into(), "bob@pc".into(), w2)
            .await;

        let msg = WireMessage::Msg {
            from: "alice".into(),
            to: None,
            body: "hello all".into(),
            ts: 1.0,
        };
        registry.broadcast(&msg, Some(alice)).await;

        let delivered = read_frame(&mut c2, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, msg);

        drop(registry);
        assert!(read_frame(&mut c1, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_broadcast_prunes_dead_peers_and_announces_offline() {
        let registry = ConnectionRegistry::new();
        let (w1, c1, a1) = socket_pair().await;
        let (w2, mut c2, a2) = socket_pair().await;
        registry
            .register(a1, "dying".into(), "dying@pc".into(), w1)
            .await;
        registry
            .register(a2, "survivor".into(), "survivor@pc".into(), w2)
            .await;

        // Kill the first peer's socket so the next write to it fails.
        drop(c1);
        // A local TCP write can succeed into the kernel buffer after the
        // peer is gone; a second write reliably surfaces the reset.
        let msg = WireMessage::PresenceReq;
        registry.broadcast(&msg, None).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        registry.broadcast(&msg, None).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        registry.broadcast(&msg, None).await;

        assert_eq!(registry.peer_count().await, 1);

        // The survivor saw the broadcasts and then the offline presence.
        let mut saw_offline = false;
        drop(registry);
        while let Some(frame) = read_frame(&mut c2, DEFAULT_MAX_FRAME_LEN).await.unwrap() {
            if let WireMessage::Presence {
                event: PresenceEvent::Offline,
                id,
                ..
            } = frame
            {
                assert_eq!(id, "dying");
                saw_offline = true;
            }
        }
        assert!(saw_offline, "survivor never saw the offline presence");
    }
}
