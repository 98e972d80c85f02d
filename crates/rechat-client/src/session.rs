//! Reconnecting client session.
//!
//! [`ChatSession::start`] spawns one background task that owns the
//! connection lifecycle: connect with a timeout, handshake, pump inbound
//! frames to the consumer callback, and on any disconnect go back to
//! connecting after a short backoff. The session only ever gives up when
//! [`ChatSession::stop`] is called.
//!
//! The consumer callback is untrusted UI code: a panic inside it is
//! caught and logged, never allowed to take the session down.

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use rechat_core::{now_ts, read_frame, write_frame, WireMessage, DEFAULT_MAX_FRAME_LEN};

/// How long one connect attempt may take before it is abandoned.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between the end of one connection (or failed attempt) and the
/// next attempt.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Everything a [`ChatSession`] needs to know before connecting.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the rendezvous server.
    pub server_addr: String,
    /// Stable peer id sent in the hello frame.
    pub id: String,
    /// Optional display name; when set it becomes the routing identity.
    pub name: Option<String>,
    pub connect_timeout: Duration,
    pub reconnect_backoff: Duration,
    /// Upper bound on inbound frame payloads.
    pub max_frame_len: u32,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            id: id.into(),
            name: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// The identity other peers route to: the display name when set and
    /// non-empty, else the id.
    pub fn identity(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.id)
    }
}

/// What the session reports to its consumer.
#[derive(Debug)]
pub enum SessionEvent {
    /// A connection was established and the handshake sent.
    Connected { server_addr: SocketAddr },
    /// The connection was lost; the session will retry unless stopped.
    Disconnected,
    /// An inbound protocol frame.
    Message(WireMessage),
}

/// A chat client session with automatic reconnection.
///
/// Create with [`ChatSession::new`], run with [`ChatSession::start`].
/// All methods are callable from any task; outbound frames serialize
/// through an internal lock on the socket's write half.
pub struct ChatSession {
    config: ClientConfig,
    /// `Some` only while connected. Taken on failure so later sends
    /// fail fast instead of writing into a dead socket.
    write_half: Mutex<Option<OwnedWriteHalf>>,
    stopped: AtomicBool,
    stop_notify: Notify,
}

type Consumer = Arc<dyn Fn(SessionEvent) + Send + Sync>;

impl ChatSession {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            write_half: Mutex::new(None),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The identity this session routes under.
    pub fn identity(&self) -> &str {
        self.config.identity()
    }

    /// Spawns the connection task. The returned handle completes only
    /// after [`stop`] is called.
    ///
    /// [`stop`]: ChatSession::stop
    pub fn start(
        self: &Arc<Self>,
        consumer: impl Fn(SessionEvent) + Send + Sync + 'static,
    ) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let consumer: Consumer = Arc::new(consumer);
        tokio::spawn(async move { session.run(consumer).await })
    }

    /// Requests a prompt exit. Idempotent; wakes the connection task out
    /// of whatever it is waiting on.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Writes one frame to the server. Returns `false` without blocking
    /// for a reconnect if the session is currently disconnected.
    pub async fn send(&self, msg: &WireMessage) -> bool {
        let mut guard = self.write_half.lock().await;
        let Some(writer) = guard.as_mut() else {
            debug!(kind = msg.type_name(), "dropping outbound frame while disconnected");
            return false;
        };
        if let Err(e) = write_frame(writer, msg).await {
            warn!(kind = msg.type_name(), error = %e, "send failed");
            // The read side will notice the dead socket and reconnect.
            *guard = None;
            return false;
        }
        true
    }

    /// Sends a chat line, broadcast when `to` is `None`.
    pub async fn send_text(&self, body: String, to: Option<String>) -> bool {
        let msg = WireMessage::Msg {
            from: self.identity().to_string(),
            to,
            body,
            ts: now_ts(),
        };
        self.send(&msg).await
    }

    /// Sends raw image bytes, base64-encoded on the wire.
    pub async fn send_image(&self, bytes: &[u8], name: String, to: Option<String>) -> bool {
        let msg = WireMessage::image(self.identity().to_string(), to, bytes, name);
        self.send(&msg).await
    }

    /// Asks the server for a fresh roster; the reply arrives as a
    /// [`SessionEvent::Message`].
    pub async fn request_roster(&self) -> bool {
        self.send(&WireMessage::PresenceReq).await
    }

    // ── Connection task ───────────────────────────────────────────────────────

    async fn run(self: Arc<Self>, consumer: Consumer) {
        while !self.is_stopped() {
            let Some(stream) = self.connect_once().await else {
                self.backoff().await;
                continue;
            };

            let server_addr = match stream.peer_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(error = %e, "connection lost before handshake");
                    self.backoff().await;
                    continue;
                }
            };

            let (mut read_half, mut write_half) = stream.into_split();

            // Handshake: identify, then ask who is already here.
            let hello = WireMessage::Hello {
                id: self.config.id.clone(),
                name: self.config.name.clone(),
            };
            let handshake = async {
                write_frame(&mut write_half, &hello).await?;
                write_frame(&mut write_half, &WireMessage::PresenceReq).await
            };
            if let Err(e) = handshake.await {
                warn!(%server_addr, error = %e, "handshake failed");
                self.backoff().await;
                continue;
            }

            *self.write_half.lock().await = Some(write_half);
            info!(%server_addr, identity = self.identity(), "connected");
            self.dispatch(&consumer, SessionEvent::Connected { server_addr });

            self.receive_loop(&mut read_half, &consumer).await;

            *self.write_half.lock().await = None;
            self.dispatch(&consumer, SessionEvent::Disconnected);

            if !self.is_stopped() {
                info!(backoff = ?self.config.reconnect_backoff, "reconnecting");
                self.backoff().await;
            }
        }
        info!("session stopped");
    }

    /// One connect attempt, bounded by the configured timeout and
    /// interruptible by [`stop`].
    ///
    /// [`stop`]: ChatSession::stop
    async fn connect_once(&self) -> Option<TcpStream> {
        // Enable the notification before the final stopped check so a
        // stop() between the check and the select cannot be missed.
        let notified = self.stop_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_stopped() {
            return None;
        }

        let attempt = timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.server_addr),
        );
        tokio::select! {
            _ = &mut notified => None,
            result = attempt => match result {
                Ok(Ok(stream)) => Some(stream),
                Ok(Err(e)) => {
                    debug!(addr = %self.config.server_addr, error = %e, "connect failed");
                    None
                }
                Err(_) => {
                    debug!(addr = %self.config.server_addr, "connect timed out");
                    None
                }
            },
        }
    }

    async fn receive_loop(&self, read_half: &mut OwnedReadHalf, consumer: &Consumer) {
        loop {
            let notified = self.stop_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }

            tokio::select! {
                _ = &mut notified => return,
                result = read_frame(read_half, self.config.max_frame_len) => match result {
                    Ok(Some(msg)) => self.dispatch(consumer, SessionEvent::Message(msg)),
                    Ok(None) => {
                        info!("server closed the connection");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "receive failed");
                        return;
                    }
                },
            }
        }
    }

    async fn backoff(&self) {
        let notified = self.stop_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_stopped() {
            return;
        }
        tokio::select! {
            _ = &mut notified => {}
            _ = sleep(self.config.reconnect_backoff) => {}
        }
    }

    /// Hands an event to the consumer, catching any panic it raises.
    fn dispatch(&self, consumer: &Consumer, event: SessionEvent) {
        let result = catch_unwind(AssertUnwindSafe(|| consumer(event)));
        if let Err(panic) = result {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            warn!(detail, "consumer panicked while handling an event");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
