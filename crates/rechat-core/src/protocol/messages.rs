//! All ReChat protocol message types.
//!
//! Messages are JSON objects discriminated by a mandatory `type` field.
//! Field names are part of the wire contract and must not change:
//!
//! | type           | fields                          | direction            |
//! |----------------|---------------------------------|----------------------|
//! | `hello`        | `id`, `name`                    | client → server      |
//! | `presence_req` | —                               | client → server      |
//! | `roster`       | `list` of `{id, addr}`          | server → client      |
//! | `presence`     | `event`, `id`, `name`           | server → client      |
//! | `msg`          | `from`, `to`?, `body`, `ts`     | bidirectional        |
//! | `img`          | `from`, `to`?, `data`, `name`, `ts` | bidirectional    |

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

// ── Roster ────────────────────────────────────────────────────────────────────

/// One entry in a roster snapshot: a registered identity and the network
/// address it connected from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Display identity of the peer (its `hello` name, falling back to id).
    pub id: String,
    /// Peer IP address as seen by the server.
    pub addr: String,
}

// ── Presence ──────────────────────────────────────────────────────────────────

/// Whether a presence notification announces a peer coming or going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceEvent {
    Online,
    Offline,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All valid ReChat messages, discriminated by the JSON `type` field.
///
/// The enum is internally tagged so that `serde_json` produces exactly the
/// flat objects the protocol requires, e.g.
/// `{"type":"msg","from":"alice","body":"hi","ts":1.7e9}`.
///
/// Optional fields (`to`, `name`) are omitted from the output when absent
/// and accept either `null` or omission on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// First frame on every connection: the peer's self-declared identity.
    Hello {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Client asks the server for a fresh roster snapshot.
    PresenceReq,
    /// Point-in-time list of registered peers, sent by the server.
    Roster { list: Vec<RosterEntry> },
    /// Broadcast notification that a peer came online or went offline.
    Presence {
        event: PresenceEvent,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// A chat message, broadcast (`to` absent) or routed to one peer.
    Msg {
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        body: String,
        /// Seconds since the Unix epoch at time of sending.
        ts: f64,
    },
    /// An image payload; `data` is the base64 encoding of the raw bytes.
    Img {
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        data: String,
        name: String,
        ts: f64,
    },
    /// Catch-all for well-formed frames with an unrecognized `type`.
    /// Decoded as a no-op so newer peers can talk to older ones.
    #[serde(other)]
    Unknown,
}

impl WireMessage {
    /// Builds an `img` message from raw payload bytes, performing the
    /// base64 encoding of the `data` field.
    ///
    /// The payload source (file picker or equivalent) supplies `(bytes,
    /// name)`; this is the only place the core touches the raw bytes.
    pub fn image(from: String, to: Option<String>, bytes: &[u8], name: String) -> Self {
        WireMessage::Img {
            from,
            to,
            data: BASE64.encode(bytes),
            name,
            ts: now_ts(),
        }
    }

    /// The routing target of a `msg`/`img`, treating an empty string the
    /// same as absent. Returns `None` for every other message type.
    pub fn target(&self) -> Option<&str> {
        match self {
            WireMessage::Msg { to, .. } | WireMessage::Img { to, .. } => {
                to.as_deref().filter(|t| !t.is_empty())
            }
            _ => None,
        }
    }

    /// Short type-name string for log messages.
    ///
    /// Deliberately excludes field values so payload bodies never end up
    /// in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "hello",
            WireMessage::PresenceReq => "presence_req",
            WireMessage::Roster { .. } => "roster",
            WireMessage::Presence { .. } => "presence",
            WireMessage::Msg { .. } => "msg",
            WireMessage::Img { .. } => "img",
            WireMessage::Unknown => "unknown",
        }
    }
}

/// Decodes the `data` field of an `img` message back into raw bytes.
pub fn decode_image_data(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(data)
}

/// Seconds since the Unix epoch as `f64`, the timestamp format used in
/// `msg.ts` and `img.ts`.
pub fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
