//! Published result state.
//!
//! One [`SharedState`] per client slot. The worker task is the sole
//! writer; UI consumers are readers. Each logical group (error,
//! screencap, version, file/download tables) sits behind its own
//! mutex, every mutation bumps that result's `version` strictly
//! monotonically under the same critical section, and no lock is ever
//! held across socket I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use rmi_core::FileEntry;

// ── SessionStatus ────────────────────────────────────────────────

/// Lifecycle of a client slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Error = 3,
}

impl SessionStatus {
    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "Disconnected",
            SessionStatus::Connecting => "Connecting",
            SessionStatus::Connected => "Connected",
            SessionStatus::Error => "Error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lock-free status cell.
#[derive(Debug)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) fn new(status: SessionStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub(crate) fn load(&self) -> SessionStatus {
        match self.0.load(Ordering::SeqCst) {
            1 => SessionStatus::Connecting,
            2 => SessionStatus::Connected,
            3 => SessionStatus::Error,
            _ => SessionStatus::Disconnected,
        }
    }

    pub(crate) fn store(&self, status: SessionStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}

// ── Result slots ─────────────────────────────────────────────────

/// Latest `LIST` outcome for one remote path.
#[derive(Debug, Clone, Default)]
pub struct FileListResult {
    pub entries: Vec<FileEntry>,
    pub error: String,
    pub version: u64,
}

/// Latest `DOWNLOAD` outcome for one remote path, including live
/// transfer progress.
#[derive(Debug, Clone, Default)]
pub struct DownloadResult {
    pub data: Vec<u8>,
    pub error: String,
    pub version: u64,
    pub total: u64,
    pub received: u64,
    pub in_progress: bool,
}

/// Latest screencap publication.
#[derive(Debug, Clone, Default)]
pub struct ScreencapResult {
    /// Raw PNG bytes as received from the device.
    pub png: Vec<u8>,
    /// RGBA pixels, empty when no decoder is installed.
    pub pixels: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub version: u64,
}

#[derive(Debug, Default)]
struct TransferTables {
    file_lists: HashMap<String, FileListResult>,
    downloads: HashMap<String, DownloadResult>,
}

// ── SharedState ──────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct SharedState {
    status: AtomicStatus,
    last_error: Mutex<String>,
    screencap: Mutex<ScreencapResult>,
    server_version: Mutex<Option<u32>>,
    tables: Mutex<TransferTables>,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            status: AtomicStatus::new(SessionStatus::Disconnected),
            last_error: Mutex::new(String::new()),
            screencap: Mutex::new(ScreencapResult::default()),
            server_version: Mutex::new(None),
            tables: Mutex::new(TransferTables::default()),
        }
    }

    // ── Status & error ───────────────────────────────────────────

    pub(crate) fn status(&self) -> SessionStatus {
        self.status.load()
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        self.status.store(status);
    }

    pub(crate) fn last_error(&self) -> String {
        self.last_error.lock().unwrap().clone()
    }

    pub(crate) fn set_error(&self, error: impl Into<String>) {
        *self.last_error.lock().unwrap() = error.into();
    }

    pub(crate) fn clear_error(&self) {
        self.last_error.lock().unwrap().clear();
    }

    // ── Screencap ────────────────────────────────────────────────

    pub(crate) fn publish_screencap(
        &self,
        png: Vec<u8>,
        pixels: Vec<u8>,
        width: i32,
        height: i32,
    ) {
        let mut slot = self.screencap.lock().unwrap();
        slot.png = png;
        slot.pixels = pixels;
        slot.width = width;
        slot.height = height;
        slot.version += 1;
    }

    pub(crate) fn screencap_png(&self) -> Option<(Vec<u8>, u64)> {
        let slot = self.screencap.lock().unwrap();
        if slot.png.is_empty() {
            return None;
        }
        Some((slot.png.clone(), slot.version))
    }

    pub(crate) fn screencap_image(&self) -> Option<ScreencapResult> {
        let slot = self.screencap.lock().unwrap();
        if slot.pixels.is_empty() || slot.width <= 0 || slot.height <= 0 {
            return None;
        }
        Some(slot.clone())
    }

    pub(crate) fn screencap_version(&self) -> u64 {
        self.screencap.lock().unwrap().version
    }

    // ── Server version ───────────────────────────────────────────

    pub(crate) fn publish_server_version(&self, version: u32) {
        *self.server_version.lock().unwrap() = Some(version);
    }

    pub(crate) fn server_version(&self) -> Option<u32> {
        *self.server_version.lock().unwrap()
    }

    // ── File lists ───────────────────────────────────────────────

    pub(crate) fn publish_file_list(&self, path: &str, outcome: Result<Vec<FileEntry>, String>) {
        let mut tables = self.tables.lock().unwrap();
        let slot = tables.file_lists.entry(path.to_string()).or_default();
        match outcome {
            Ok(entries) => {
                slot.entries = entries;
                slot.error.clear();
            }
            Err(error) => {
                slot.entries.clear();
                slot.error = error;
            }
        }
        slot.version += 1;
    }

    pub(crate) fn file_list(&self, path: &str) -> Option<FileListResult> {
        self.tables.lock().unwrap().file_lists.get(path).cloned()
    }

    // ── Downloads ────────────────────────────────────────────────

    /// Reset a download slot ahead of a new request. Does not bump the
    /// version; the version marks completed outcomes only.
    pub(crate) fn reset_download(&self, path: &str) {
        let mut tables = self.tables.lock().unwrap();
        let slot = tables.downloads.entry(path.to_string()).or_default();
        slot.data.clear();
        slot.error.clear();
        slot.total = 0;
        slot.received = 0;
        slot.in_progress = true;
    }

    pub(crate) fn publish_download_data(&self, path: &str, data: Vec<u8>) {
        let mut tables = self.tables.lock().unwrap();
        let slot = tables.downloads.entry(path.to_string()).or_default();
        slot.total = data.len() as u64;
        slot.received = slot.total;
        slot.data = data;
        slot.error.clear();
        slot.in_progress = false;
        slot.version += 1;
    }

    pub(crate) fn publish_download_error(&self, path: &str, error: impl Into<String>) {
        let mut tables = self.tables.lock().unwrap();
        let slot = tables.downloads.entry(path.to_string()).or_default();
        slot.data.clear();
        slot.error = error.into();
        slot.total = 0;
        slot.received = 0;
        slot.in_progress = false;
        slot.version += 1;
    }

    /// Live progress update; versions are reserved for outcomes.
    pub(crate) fn set_download_progress(
        &self,
        path: &str,
        received: u64,
        total: u64,
        in_progress: bool,
    ) {
        if path.is_empty() {
            return;
        }
        let mut tables = self.tables.lock().unwrap();
        let slot = tables.downloads.entry(path.to_string()).or_default();
        slot.received = received;
        slot.total = total;
        slot.in_progress = in_progress;
    }

    /// Hand the download result to the caller, moving the payload out
    /// of the table so large transfers are not kept twice.
    pub(crate) fn take_download(&self, path: &str) -> Option<DownloadResult> {
        let mut tables = self.tables.lock().unwrap();
        let slot = tables.downloads.get_mut(path)?;
        let result = DownloadResult {
            data: std::mem::take(&mut slot.data),
            error: slot.error.clone(),
            version: slot.version,
            total: slot.total,
            received: slot.received,
            in_progress: slot.in_progress,
        };
        Some(result)
    }

    pub(crate) fn download_progress(&self, path: &str) -> Option<(u64, u64, bool)> {
        let tables = self.tables.lock().unwrap();
        let slot = tables.downloads.get(path)?;
        Some((slot.received, slot.total, slot.in_progress))
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        let status = AtomicStatus::new(SessionStatus::Disconnected);
        for s in [
            SessionStatus::Connecting,
            SessionStatus::Connected,
            SessionStatus::Error,
            SessionStatus::Disconnected,
        ] {
            status.store(s);
            assert_eq!(status.load(), s);
        }
    }

    #[test]
    fn list_versions_are_monotonic() {
        let state = SharedState::new();
        state.publish_file_list("/a", Ok(vec![FileEntry::dir("x")]));
        assert_eq!(state.file_list("/a").unwrap().version, 1);

        state.publish_file_list("/a", Err("ERR list".into()));
        let slot = state.file_list("/a").unwrap();
        assert_eq!(slot.version, 2);
        assert!(slot.entries.is_empty());
        assert_eq!(slot.error, "ERR list");

        // Other paths have independent counters.
        assert!(state.file_list("/b").is_none());
    }

    #[test]
    fn download_lifecycle() {
        let state = SharedState::new();
        state.reset_download("/f");
        assert_eq!(state.download_progress("/f").unwrap(), (0, 0, true));

        state.set_download_progress("/f", 10, 100, true);
        assert_eq!(state.download_progress("/f").unwrap(), (10, 100, true));

        state.publish_download_data("/f", vec![1, 2, 3]);
        let result = state.take_download("/f").unwrap();
        assert_eq!(result.data, vec![1, 2, 3]);
        assert_eq!(result.version, 1);
        assert_eq!(result.received, 3);
        assert!(!result.in_progress);

        // The payload moves out on take; version and metadata stay.
        let again = state.take_download("/f").unwrap();
        assert!(again.data.is_empty());
        assert_eq!(again.version, 1);
    }

    #[test]
    fn screencap_publication() {
        let state = SharedState::new();
        assert!(state.screencap_png().is_none());
        assert_eq!(state.screencap_version(), 0);

        state.publish_screencap(vec![1, 2], vec![0; 16], 2, 2);
        let (png, version) = state.screencap_png().unwrap();
        assert_eq!(png, vec![1, 2]);
        assert_eq!(version, 1);
        assert!(state.screencap_image().is_some());

        // Without pixels the image accessor reports nothing.
        state.publish_screencap(vec![3], Vec::new(), 4, 4);
        assert!(state.screencap_image().is_none());
        assert_eq!(state.screencap_version(), 2);
    }

    #[test]
    fn error_slot() {
        let state = SharedState::new();
        assert!(state.last_error().is_empty());
        state.set_error("boom");
        assert_eq!(state.last_error(), "boom");
        state.clear_error();
        assert!(state.last_error().is_empty());
    }
}
