//! Length-prefixed framing.
//!
//! ## Wire format
//!
//! ```text
//! length:   u32 big-endian  (4)
//! payload:  [u8]            (exactly `length` bytes)
//! ```
//!
//! No magic, no version byte, no padding. A fixed 4-byte header is the
//! simplest unambiguous delimiter over TCP: no escaping and no
//! terminator ambiguity. Payloads are opaque octets; interpretation is
//! up to the session layer.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RmiError;

/// Size of the frame header on the wire.
pub const HEADER_LEN: usize = 4;

/// Chunk size used when draining or streaming payloads.
pub const IO_CHUNK: usize = 4096;

// ── Byte-level helpers ───────────────────────────────────────────

/// Decode a big-endian frame length.
pub fn read_be32(bytes: &[u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(*bytes)
}

/// Encode a big-endian frame length.
pub fn write_be32(value: u32) -> [u8; HEADER_LEN] {
    value.to_be_bytes()
}

/// Frame a payload into a single contiguous buffer (header + payload).
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(HEADER_LEN + payload.len());
    framed.extend_from_slice(&write_be32(payload.len() as u32));
    framed.extend_from_slice(payload);
    framed
}

/// Byte-exact comparison of a payload against a keyword.
///
/// A zero-length payload never equals a non-empty keyword.
pub fn payload_equals(payload: &[u8], text: &str) -> bool {
    payload == text.as_bytes()
}

/// Byte-exact prefix test of a payload against a keyword.
pub fn payload_starts_with(payload: &[u8], text: &str) -> bool {
    payload.len() >= text.len() && &payload[..text.len()] == text.as_bytes()
}

// ── Async frame I/O ──────────────────────────────────────────────

/// Write one frame: header followed by the payload.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), RmiError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > u32::MAX as usize {
        return Err(RmiError::Protocol("payload too large to frame".into()));
    }
    writer.write_all(&write_be32(payload.len() as u32)).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Write one frame carrying a textual payload.
pub async fn write_text<W>(writer: &mut W, text: &str) -> Result<(), RmiError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, text.as_bytes()).await
}

/// Read the 4-byte header and return the announced payload length.
///
/// An orderly close before or during the header maps to
/// [`RmiError::ConnectionClosed`].
pub async fn read_header<R>(reader: &mut R) -> Result<u32, RmiError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => Ok(read_be32(&header)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(RmiError::ConnectionClosed)
        }
        Err(e) => Err(RmiError::Io(e)),
    }
}

/// Read exactly `len` payload bytes.
pub async fn read_payload<R>(reader: &mut R, len: u32) -> Result<Vec<u8>, RmiError>
where
    R: AsyncRead + Unpin,
{
    let mut payload = vec![0u8; len as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(payload),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(RmiError::ConnectionClosed)
        }
        Err(e) => Err(RmiError::Io(e)),
    }
}

/// Read one complete frame, enforcing a payload cap.
///
/// With `max > 0`, a header announcing more than `max` bytes yields
/// [`RmiError::FrameTooLarge`] *without consuming any payload bytes*;
/// the caller is responsible for [`drain`]ing the announced length if
/// it wants to keep the stream aligned. `max == 0` means uncapped.
pub async fn read_frame<R>(reader: &mut R, max: u32) -> Result<Vec<u8>, RmiError>
where
    R: AsyncRead + Unpin,
{
    let len = read_header(reader).await?;
    if max > 0 && len > max {
        return Err(RmiError::FrameTooLarge { len, max });
    }
    if len == 0 {
        return Ok(Vec::new());
    }
    read_payload(reader, len).await
}

/// Discard exactly `len` bytes from the stream in fixed-size chunks.
pub async fn drain<R>(reader: &mut R, len: u32) -> Result<(), RmiError>
where
    R: AsyncRead + Unpin,
{
    let mut remaining = len as usize;
    let mut buf = [0u8; IO_CHUNK];
    while remaining > 0 {
        let chunk = remaining.min(IO_CHUNK);
        match reader.read_exact(&mut buf[..chunk]).await {
            Ok(_) => remaining -= chunk,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(RmiError::ConnectionClosed)
            }
            Err(e) => return Err(RmiError::Io(e)),
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────
