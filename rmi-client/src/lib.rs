//! # rmi-client: desktop client slot for the RMI device link
//!
//! Each [`RmiClient`] owns one connection to a device server: a
//! background worker task that owns the socket, drains a command
//! mailbox in enqueue order, enforces per-command reply deadlines,
//! transparently skips inbound heartbeats, and publishes results
//! (screencaps, file listings, download bytes, progress) into shared
//! observable state for a UI to read.
//!
//! The worker is the only writer to the shared state; consumers read
//! under short per-group mutexes and use the monotonic `version`
//! counters as watermarks to detect new results.

pub mod client;
pub mod config;
pub mod png;
pub mod state;

mod worker;

pub use client::RmiClient;
pub use config::ClientConfig;
pub use png::{DecodedImage, PngDecoder};
pub use state::{DownloadResult, FileListResult, ScreencapResult, SessionStatus};
