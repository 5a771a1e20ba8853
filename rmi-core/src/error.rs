//! Domain-specific error types for the RMI protocol.
//!
//! All fallible operations return `Result<T, RmiError>`. No panics on
//! invalid input; every error is typed and recoverable by the caller.

use thiserror::Error;

/// The canonical error type for the RMI protocol.
#[derive(Debug, Error)]
pub enum RmiError {
    // ── Transport Errors ─────────────────────────────────────────
    /// No resolved address candidate accepted the connection.
    #[error("unable to connect: {0}")]
    Connect(String),

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection in an orderly fashion.
    #[error("connection closed by peer")]
    ConnectionClosed,

    // ── Deadline Errors ──────────────────────────────────────────
    /// An operation exceeded its deadline.
    #[error("timed out waiting for server response")]
    Timeout,

    /// The worker's stop flag was raised while an operation was in
    /// flight.
    #[error("operation cancelled")]
    Cancelled,

    // ── Protocol Errors ──────────────────────────────────────────
    /// A frame header announced a payload larger than the caller's cap.
    ///
    /// No payload bytes have been consumed when this is returned; the
    /// caller must drain `len` bytes to preserve frame alignment.
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: u32, max: u32 },

    /// The peer violated the protocol (wrong frame order, unparseable
    /// reply, malformed listing, ...).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RmiError {
    /// Whether this error is fatal to the session (spec taxonomy:
    /// transport, protocol and timeout errors tear the session down;
    /// command-level `ERR` replies do not reach this type).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RmiError::Cancelled)
    }
}

impl From<String> for RmiError {
    fn from(s: String) -> Self {
        RmiError::Protocol(s)
    }
}

impl From<&str> for RmiError {
    fn from(s: &str) -> Self {
        RmiError::Protocol(s.to_string())
    }
}
