//! Core wire protocol for the RMI device link.
//!
//! An RMI session is a single TCP connection carrying length-prefixed
//! frames: a 4-byte big-endian payload length followed by exactly that
//! many payload bytes. Commands and most replies are textual payloads;
//! screencaps and downloads travel as raw binary frames. `HEARTBEAT`
//! frames may appear at any time in either direction and never advance
//! reply dispatch.

pub mod command;
pub mod error;
pub mod frame;
pub mod listing;
pub mod transport;

pub use command::{Command, CommandParseError};
pub use error::RmiError;
pub use listing::FileEntry;
pub use transport::{RecvStep, Transport};

/// Commands larger than this are drained and treated as a protocol
/// violation by the server session.
pub const MAX_COMMAND_BYTES: u32 = 1024;

/// Upper bound for a rendered directory listing frame.
pub const LIST_MAX_BYTES: usize = 1024 * 1024;
