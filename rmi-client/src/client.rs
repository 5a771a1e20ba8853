//! Client slot API.
//!
//! A slot owns at most one worker task at a time. `connect` spawns the
//! worker (it must be called within a tokio runtime), the enqueue
//! methods feed its mailbox, and the readers observe the state the
//! worker publishes. Commands from one slot are serialized in enqueue
//! order through the mailbox.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rmi_core::command::{
    CMD_DELETE, CMD_DOWNLOAD, CMD_LIST, CMD_OPEN, CMD_PRESS, CMD_PRESS_INPUT, CMD_QUIT,
    CMD_RESTART, CMD_SCREENCAP, CMD_VERSION,
};

use crate::config::ClientConfig;
use crate::png::PngDecoder;
use crate::state::{
    DownloadResult, FileListResult, ScreencapResult, SessionStatus, SharedState,
};
use crate::worker::{self, OutboundMessage, ReplyKind};

/// State shared between the slot handle and its worker task.
pub(crate) struct ClientShared {
    pub(crate) state: SharedState,
    pub(crate) decoder: Option<Arc<dyn PngDecoder>>,
}

struct ControlBlock {
    cancel: CancellationToken,
    sender: Option<mpsc::UnboundedSender<OutboundMessage>>,
    worker: Option<JoinHandle<()>>,
}

/// One client slot: worker task, mailbox and published results.
pub struct RmiClient {
    shared: Arc<ClientShared>,
    control: Mutex<ControlBlock>,
}

impl Default for RmiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RmiClient {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a slot with an external PNG decoder; screencaps then
    /// publish RGBA pixels in addition to the raw PNG bytes.
    pub fn with_decoder(decoder: Arc<dyn PngDecoder>) -> Self {
        Self::build(Some(decoder))
    }

    fn build(decoder: Option<Arc<dyn PngDecoder>>) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                state: SharedState::new(),
                decoder,
            }),
            control: Mutex::new(ControlBlock {
                cancel: CancellationToken::new(),
                sender: None,
                worker: None,
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start a session. Returns `false` when the slot is already
    /// connecting or connected. Must be called within a tokio
    /// runtime.
    pub fn connect(&self, config: ClientConfig) -> bool {
        let current = self.shared.state.status();
        if matches!(current, SessionStatus::Connecting | SessionStatus::Connected) {
            return false;
        }

        let mut control = self.control.lock().unwrap();
        // The previous worker has already observed a terminal status;
        // its handle just has not been reaped.
        control.worker.take();

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        self.shared.state.clear_error();
        self.shared.state.set_status(SessionStatus::Connecting);
        debug!("connecting to {}:{}", config.host, config.port);

        let handle = tokio::spawn(worker::run(
            Arc::clone(&self.shared),
            config,
            rx,
            cancel.clone(),
        ));
        control.cancel = cancel;
        control.sender = Some(tx);
        control.worker = Some(handle);
        true
    }

    /// Stop the worker and join it. The slot ends Disconnected unless
    /// the session already failed.
    pub async fn disconnect(&self) {
        let (cancel, worker) = {
            let mut control = self.control.lock().unwrap();
            control.sender.take();
            (control.cancel.clone(), control.worker.take())
        };
        cancel.cancel();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
        if self.shared.state.status() != SessionStatus::Error {
            self.shared.state.set_status(SessionStatus::Disconnected);
        }
    }

    // ── Command enqueueing ───────────────────────────────────────

    pub fn send_screencap(&self) {
        self.enqueue_command(CMD_SCREENCAP.to_string(), ReplyKind::Screencap, false);
    }

    pub fn send_quit(&self) {
        self.enqueue_command(CMD_QUIT.to_string(), ReplyKind::Ok, true);
    }

    pub fn send_restart(&self) {
        self.enqueue_command(CMD_RESTART.to_string(), ReplyKind::Ok, true);
    }

    pub fn send_version(&self) {
        self.enqueue_command(CMD_VERSION.to_string(), ReplyKind::Version, false);
    }

    pub fn send_press(&self, keycode: i32) {
        self.enqueue_command(format!("{CMD_PRESS} {keycode}"), ReplyKind::Ok, false);
    }

    pub fn send_press_input(&self, keycode: i32) {
        self.enqueue_command(format!("{CMD_PRESS_INPUT} {keycode}"), ReplyKind::Ok, false);
    }

    pub fn send_open(&self, package: &str) {
        if self.shared.state.status() != SessionStatus::Connected {
            return;
        }
        if package.is_empty() {
            self.shared.state.set_error("Package name is empty.");
            return;
        }
        if contains_whitespace(package) {
            self.shared
                .state
                .set_error("Package name must not contain whitespace.");
            return;
        }
        self.enqueue_command(format!("{CMD_OPEN} {package}"), ReplyKind::Ok, false);
    }

    pub fn send_upload(&self, local_path: impl Into<PathBuf>, remote_path: &str) {
        self.enqueue_upload(local_path.into(), remote_path, false);
    }

    /// Upload and, once the server acknowledges, ask it to re-exec.
    /// The slot transitions to Disconnected afterwards; scheduling a
    /// reconnect is the embedder's business.
    pub fn send_upload_and_restart(&self, local_path: impl Into<PathBuf>, remote_path: &str) {
        self.enqueue_upload(local_path.into(), remote_path, true);
    }

    pub fn request_file_list(&self, path: &str) {
        if !self.validate_path(path, "File list") {
            return;
        }
        self.enqueue(OutboundMessage::Command {
            text: format!("{CMD_LIST} {path}"),
            expect: ReplyKind::List { path: path.to_string() },
            disconnect_after_ok: false,
        });
    }

    pub fn request_download(&self, path: &str) {
        if !self.validate_path(path, "Download") {
            return;
        }
        self.shared.state.reset_download(path);
        self.enqueue(OutboundMessage::Command {
            text: format!("{CMD_DOWNLOAD} {path}"),
            expect: ReplyKind::Download { path: path.to_string() },
            disconnect_after_ok: false,
        });
    }

    pub fn request_delete(&self, path: &str) {
        if !self.validate_path(path, "Delete") {
            return;
        }
        self.enqueue_command(format!("{CMD_DELETE} {path}"), ReplyKind::Ok, false);
    }

    // ── Readers ──────────────────────────────────────────────────

    pub fn status(&self) -> SessionStatus {
        self.shared.state.status()
    }

    pub fn status_label(&self) -> &'static str {
        self.shared.state.status().label()
    }

    pub fn last_error(&self) -> String {
        self.shared.state.last_error()
    }

    pub fn server_version(&self) -> Option<u32> {
        self.shared.state.server_version()
    }

    /// Raw PNG bytes of the latest screencap with its version.
    pub fn screencap_png(&self) -> Option<(Vec<u8>, u64)> {
        self.shared.state.screencap_png()
    }

    /// Decoded screencap; `None` until a decoder-equipped slot has
    /// published pixels.
    pub fn screencap_image(&self) -> Option<ScreencapResult> {
        self.shared.state.screencap_image()
    }

    pub fn screencap_version(&self) -> u64 {
        self.shared.state.screencap_version()
    }

    pub fn file_list(&self, path: &str) -> Option<FileListResult> {
        self.shared.state.file_list(path)
    }

    /// Latest download outcome; moves the payload out of the slot.
    pub fn take_download(&self, path: &str) -> Option<DownloadResult> {
        self.shared.state.take_download(path)
    }

    /// `(received, total, in_progress)` for a running download.
    pub fn download_progress(&self, path: &str) -> Option<(u64, u64, bool)> {
        self.shared.state.download_progress(path)
    }

    // ── Internals ────────────────────────────────────────────────

    fn validate_path(&self, path: &str, what: &str) -> bool {
        if self.shared.state.status() != SessionStatus::Connected {
            return false;
        }
        if path.is_empty() {
            self.shared.state.set_error(format!("{what} path is empty."));
            return false;
        }
        if contains_whitespace(path) {
            self.shared
                .state
                .set_error(format!("{what} path must not contain whitespace."));
            return false;
        }
        true
    }

    fn enqueue_command(&self, text: String, expect: ReplyKind, disconnect_after_ok: bool) {
        self.enqueue(OutboundMessage::Command {
            text,
            expect,
            disconnect_after_ok,
        });
    }

    fn enqueue_upload(&self, local_path: PathBuf, remote_path: &str, restart_after: bool) {
        if self.shared.state.status() != SessionStatus::Connected {
            return;
        }
        self.enqueue(OutboundMessage::Upload {
            local_path,
            remote_path: remote_path.to_string(),
            restart_after,
        });
    }

    fn enqueue(&self, message: OutboundMessage) {
        if self.shared.state.status() != SessionStatus::Connected {
            return;
        }
        let control = self.control.lock().unwrap();
        if let Some(sender) = &control.sender {
            let _ = sender.send(message);
        }
    }
}

fn contains_whitespace(value: &str) -> bool {
    value.chars().any(|c| c.is_whitespace())
}
