//! Frame codec for ReChat messages.
//!
//! Wire format:
//! ```text
//! [payload_len:4 big-endian][payload:N]   payload = UTF-8 JSON
//! ```
//!
//! TCP is a stream protocol: a single read may return less than one
//! complete frame, or bytes from several frames at once. [`read_frame`]
//! therefore reads *exactly* the prefix and then *exactly* the declared
//! payload, so decoding is independent of how the bytes were chunked in
//! transit. A short read anywhere inside a frame means the peer went away
//! and is reported as end-of-stream, not as an error.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::messages::WireMessage;

/// Size of the length prefix in bytes.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Default upper bound on the declared payload length.
///
/// The reference protocol trusts the 4-byte prefix without a bound, which
/// lets a peer claim an arbitrarily large payload. We cap it and drop the
/// connection on violation; callers can raise the limit per connection.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Errors that can occur while encoding or decoding frames.
///
/// End-of-stream is deliberately *not* an error: [`read_frame`] reports it
/// as `Ok(None)`. Every `Err` means the connection is unsalvageable and
/// the caller must stop reading from it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The length prefix declares a payload larger than the allowed maximum.
    #[error("frame too large: declared {declared} bytes, maximum is {max}")]
    FrameTooLarge { declared: u32, max: u32 },

    /// The payload is not a parseable protocol message.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// An I/O error other than a clean end-of-stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes a [`WireMessage`] into a byte vector including the 4-byte
/// big-endian length prefix.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if serialization fails,
/// which cannot happen for messages constructed through this crate's
/// types — it is a logic error, not a runtime condition.
pub fn encode_frame(msg: &WireMessage) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(msg)?;
    let mut buf = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Reads one complete frame from `reader` and decodes it.
///
/// Returns `Ok(None)` when the stream ends cleanly — before the prefix or
/// anywhere inside the frame. Partial bytes are never surfaced.
///
/// # Errors
///
/// - [`ProtocolError::FrameTooLarge`] if the prefix exceeds `max_frame_len`.
/// - [`ProtocolError::MalformedPayload`] if the payload is not valid JSON
///   for a protocol message.
/// - [`ProtocolError::Io`] for transport errors other than end-of-stream.
pub async fn read_frame<R>(
    reader: &mut R,
    max_frame_len: u32,
) -> Result<Option<WireMessage>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LEN_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let declared = u32::from_be_bytes(prefix);
    if declared > max_frame_len {
        return Err(ProtocolError::FrameTooLarge {
            declared,
            max: max_frame_len,
        });
    }

    let mut payload = vec![0u8; declared as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let msg = serde_json::from_slice(&payload)?;
    Ok(Some(msg))
}

/// Encodes `msg` and writes the complete frame to `writer`.
///
/// `write_all` is used so the entire frame goes out even if the OS accepts
/// only a partial write on the first call.
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] if the write fails.
pub async fn write_frame<W>(writer: &mut W, msg: &WireMessage) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(msg)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
