//! The per-slot background worker.
//!
//! Owns the socket for its whole lifetime. Authenticates, then loops:
//! drain the mailbox (100 ms waits), send each command, consume
//! exactly the reply frames that command expects, and keep the link
//! alive with heartbeats when idle. Inbound `HEARTBEAT` frames are
//! discarded wherever a reply is awaited.
//!
//! Fatal errors (transport, protocol, timeout) put the slot into
//! `Error` and end the task; command-level `ERR` replies land in the
//! relevant result slot and the session continues.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rmi_core::command::{
    CMD_AUTH, CMD_HEARTBEAT, CMD_RESTART, CMD_UPLOAD, RESP_ERR_PREFIX, RESP_OK,
    RESP_VERSION_PREFIX,
};
use rmi_core::frame::{payload_equals, payload_starts_with, read_be32, HEADER_LEN};
use rmi_core::{RmiError, Transport};

use crate::client::ClientShared;
use crate::config::ClientConfig;
use crate::png;
use crate::state::SessionStatus;

// ── Timing ───────────────────────────────────────────────────────

/// Reply deadline for auth, plain `OK` commands, listings and the
/// download control frame.
const AUTH_TIMEOUT: Duration = Duration::from_secs(5);
/// Reply deadline for `VERSION`.
const VERSION_TIMEOUT: Duration = Duration::from_secs(3);
/// Reply deadline for screencap and download payload frames.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(15);
/// Idle gap after which the worker emits a heartbeat.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Deadline for the heartbeat `OK`.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);
/// Mailbox wait per loop iteration.
const MAILBOX_WAIT: Duration = Duration::from_millis(100);

/// Cap for control replies (`OK`, `ERR ...`, `VERSION n`).
const CONTROL_MAX: u32 = 256;

// ── Mailbox records ──────────────────────────────────────────────

/// What kind of reply a command consumes.
#[derive(Debug, Clone)]
pub(crate) enum ReplyKind {
    /// `OK` or `ERR ...`.
    Ok,
    /// `VERSION <unsigned>`.
    Version,
    /// One PNG (or `ERR ...`) frame.
    Screencap,
    /// One listing frame for `path`.
    List { path: String },
    /// `OK` plus one binary frame, or `ERR ...`, for `path`.
    Download { path: String },
}

/// One mailbox record.
#[derive(Debug)]
pub(crate) enum OutboundMessage {
    Command {
        text: String,
        expect: ReplyKind,
        disconnect_after_ok: bool,
    },
    Upload {
        local_path: PathBuf,
        remote_path: String,
        restart_after: bool,
    },
}

/// Whether the main loop keeps going after a message.
enum Flow {
    Continue,
    Stop,
}

// ── Worker entry point ───────────────────────────────────────────

pub(crate) async fn run(
    shared: Arc<ClientShared>,
    config: ClientConfig,
    mut mailbox: mpsc::UnboundedReceiver<OutboundMessage>,
    cancel: CancellationToken,
) {
    let mut transport = match Transport::connect(&config.host, config.port).await {
        Ok(transport) => transport,
        Err(e) => {
            shared.state.set_error(e.to_string());
            shared.state.set_status(SessionStatus::Error);
            return;
        }
    };

    if let Err(e) = authenticate(&mut transport, &config, &cancel).await {
        // A disconnect during the handshake is not a session failure.
        if !matches!(e, RmiError::Cancelled) {
            shared.state.set_error(e.to_string());
            shared.state.set_status(SessionStatus::Error);
        }
        return;
    }

    shared.state.set_status(SessionStatus::Connected);
    debug!("session established with {}:{}", config.host, config.port);
    let mut last_heartbeat = Instant::now();

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = timeout(MAILBOX_WAIT, mailbox.recv()) => match received {
                Ok(Some(message)) => Some(message),
                // All senders dropped: the slot is shutting down.
                Ok(None) => break,
                Err(_) => None,
            },
        };

        match message {
            Some(message) => {
                match process_message(&shared, &mut transport, &cancel, message).await {
                    Ok(Flow::Continue) => {
                        last_heartbeat = Instant::now();
                    }
                    Ok(Flow::Stop) => break,
                    Err(e) => {
                        if !matches!(e, RmiError::Cancelled) {
                            shared.state.set_error(e.to_string());
                            shared.state.set_status(SessionStatus::Error);
                        }
                        return;
                    }
                }
            }
            None => {
                if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                    if let Err(e) = exchange_heartbeat(&mut transport, &cancel).await {
                        if !matches!(e, RmiError::Cancelled) {
                            shared.state.set_error(e.to_string());
                            shared.state.set_status(SessionStatus::Error);
                        }
                        return;
                    }
                    last_heartbeat = Instant::now();
                }
            }
        }
    }

    if shared.state.status() != SessionStatus::Error {
        shared.state.set_status(SessionStatus::Disconnected);
    }
}

async fn authenticate(
    transport: &mut Transport,
    config: &ClientConfig,
    cancel: &CancellationToken,
) -> Result<(), RmiError> {
    let login = format!("{CMD_AUTH} {} {}", config.username, config.password);
    transport.send_text(&login).await?;

    let reply = receive_skipping_heartbeats(transport, AUTH_TIMEOUT, CONTROL_MAX, cancel).await?;
    if payload_equals(&reply, RESP_OK) {
        return Ok(());
    }
    if payload_starts_with(&reply, RESP_ERR_PREFIX) {
        return Err(RmiError::Protocol(text_of(&reply)));
    }
    Err(RmiError::Protocol(format!(
        "unexpected auth response: {}",
        text_of(&reply)
    )))
}

// ── Message processing ───────────────────────────────────────────

async fn process_message(
    shared: &ClientShared,
    transport: &mut Transport,
    cancel: &CancellationToken,
    message: OutboundMessage,
) -> Result<Flow, RmiError> {
    match message {
        OutboundMessage::Command {
            text,
            expect,
            disconnect_after_ok,
        } => {
            transport.send_text(&text).await?;
            dispatch_reply(shared, transport, cancel, expect, disconnect_after_ok).await
        }
        OutboundMessage::Upload {
            local_path,
            remote_path,
            restart_after,
        } => process_upload(shared, transport, cancel, local_path, &remote_path, restart_after)
            .await,
    }
}

async fn dispatch_reply(
    shared: &ClientShared,
    transport: &mut Transport,
    cancel: &CancellationToken,
    expect: ReplyKind,
    disconnect_after_ok: bool,
) -> Result<Flow, RmiError> {
    match expect {
        ReplyKind::Ok => {
            let reply =
                receive_skipping_heartbeats(transport, AUTH_TIMEOUT, CONTROL_MAX, cancel).await?;
            if payload_equals(&reply, RESP_OK) {
                if disconnect_after_ok {
                    shared.state.set_status(SessionStatus::Disconnected);
                    return Ok(Flow::Stop);
                }
            } else if payload_starts_with(&reply, RESP_ERR_PREFIX) {
                shared.state.set_error(text_of(&reply));
            } else {
                shared
                    .state
                    .set_error(format!("unexpected response: {}", text_of(&reply)));
            }
            Ok(Flow::Continue)
        }

        ReplyKind::Version => {
            // A slow or failed version probe is not worth the session.
            let reply =
                match receive_skipping_heartbeats(transport, VERSION_TIMEOUT, CONTROL_MAX, cancel)
                    .await
                {
                    Ok(reply) => reply,
                    Err(RmiError::Cancelled) => return Err(RmiError::Cancelled),
                    Err(e) => {
                        shared.state.set_error(e.to_string());
                        return Ok(Flow::Continue);
                    }
                };
            match parse_version_payload(&reply) {
                Ok(version) => shared.state.publish_server_version(version),
                Err(e) => shared.state.set_error(e),
            }
            Ok(Flow::Continue)
        }

        ReplyKind::Screencap => {
            let data =
                receive_skipping_heartbeats(transport, TRANSFER_TIMEOUT, 0, cancel).await?;
            publish_screencap(shared, data);
            Ok(Flow::Continue)
        }

        ReplyKind::List { path } => {
            let payload =
                receive_skipping_heartbeats(transport, AUTH_TIMEOUT, 0, cancel).await?;
            match rmi_core::listing::parse(&payload) {
                Ok(entries) => shared.state.publish_file_list(&path, Ok(entries)),
                Err(e) => {
                    let text = match e {
                        RmiError::Protocol(text) => text,
                        other => other.to_string(),
                    };
                    shared.state.publish_file_list(&path, Err(text));
                }
            }
            Ok(Flow::Continue)
        }

        ReplyKind::Download { path } => {
            let control =
                receive_skipping_heartbeats(transport, AUTH_TIMEOUT, CONTROL_MAX, cancel).await?;
            if payload_equals(&control, RESP_OK) {
                let data =
                    receive_download_body(shared, transport, TRANSFER_TIMEOUT, cancel, &path)
                        .await?;
                shared.state.publish_download_data(&path, data);
            } else if payload_starts_with(&control, RESP_ERR_PREFIX) {
                shared.state.publish_download_error(&path, text_of(&control));
            } else {
                shared.state.publish_download_error(
                    &path,
                    format!("unexpected response: {}", text_of(&control)),
                );
            }
            Ok(Flow::Continue)
        }
    }
}

// ── Upload flow ──────────────────────────────────────────────────

async fn process_upload(
    shared: &ClientShared,
    transport: &mut Transport,
    cancel: &CancellationToken,
    local_path: PathBuf,
    remote_path: &str,
    restart_after: bool,
) -> Result<Flow, RmiError> {
    if remote_path.is_empty() {
        shared.state.set_error("Upload requires a remote path.");
        return Ok(Flow::Continue);
    }
    if remote_path.chars().any(|c| c.is_whitespace()) {
        shared
            .state
            .set_error("Upload remote path must not contain whitespace.");
        return Ok(Flow::Continue);
    }

    let data = match tokio::fs::read(&local_path).await {
        Ok(data) => data,
        Err(e) => {
            shared
                .state
                .set_error(format!("unable to read upload file: {e}"));
            return Ok(Flow::Continue);
        }
    };
    if data.len() > u32::MAX as usize {
        shared.state.set_error("Upload file exceeds size limit.");
        return Ok(Flow::Continue);
    }

    let command = format!("{CMD_UPLOAD} {remote_path} {}", data.len());
    transport.send_text(&command).await?;
    transport.send_frame(&data).await?;
    debug!("upload {}: {} bytes sent", remote_path, data.len());

    let reply = receive_skipping_heartbeats(transport, AUTH_TIMEOUT, CONTROL_MAX, cancel).await?;
    if !payload_equals(&reply, RESP_OK) {
        if payload_starts_with(&reply, RESP_ERR_PREFIX) {
            shared.state.set_error(text_of(&reply));
        } else {
            shared
                .state
                .set_error(format!("unexpected response: {}", text_of(&reply)));
        }
        return Ok(Flow::Continue);
    }

    if !restart_after {
        return Ok(Flow::Continue);
    }

    // Self-update: the server stages and renames on its side; ask it
    // to re-exec and leave the session. Reconnection is scheduled by
    // the embedder.
    transport.send_text(CMD_RESTART).await?;
    let reply = receive_skipping_heartbeats(transport, AUTH_TIMEOUT, CONTROL_MAX, cancel).await?;
    if payload_equals(&reply, RESP_OK) {
        shared.state.set_status(SessionStatus::Disconnected);
        return Ok(Flow::Stop);
    }
    if payload_starts_with(&reply, RESP_ERR_PREFIX) {
        shared.state.set_error(text_of(&reply));
    } else {
        shared
            .state
            .set_error(format!("unexpected response: {}", text_of(&reply)));
    }
    Ok(Flow::Continue)
}

// ── Heartbeats ───────────────────────────────────────────────────

async fn exchange_heartbeat(
    transport: &mut Transport,
    cancel: &CancellationToken,
) -> Result<(), RmiError> {
    transport.send_text(CMD_HEARTBEAT).await?;
    let reply =
        receive_skipping_heartbeats(transport, HEARTBEAT_TIMEOUT, CONTROL_MAX, cancel).await?;
    if payload_equals(&reply, RESP_OK) {
        return Ok(());
    }
    if payload_starts_with(&reply, RESP_ERR_PREFIX) {
        return Err(RmiError::Protocol(text_of(&reply)));
    }
    Err(RmiError::Protocol(format!(
        "unexpected heartbeat response: {}",
        text_of(&reply)
    )))
}

// ── Receive helpers ──────────────────────────────────────────────

/// Read frames until one is not a heartbeat, under one total deadline.
async fn receive_skipping_heartbeats(
    transport: &mut Transport,
    total: Duration,
    max: u32,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, RmiError> {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return Err(RmiError::Cancelled);
        }
        let payload = transport.read_frame_by(deadline, max, cancel).await?;
        if payload_equals(&payload, CMD_HEARTBEAT) {
            continue;
        }
        return Ok(payload);
    }
}

/// Specialized download-body reader.
///
/// The next frame is either the binary body or an interleaved
/// heartbeat, and the body can be huge, so the general skip loop is
/// not reused: a frame whose length matches `HEARTBEAT` is read and
/// compared (and skipped if it is one), while any other length is
/// streamed directly with incremental progress publication.
async fn receive_download_body(
    shared: &ClientShared,
    transport: &mut Transport,
    total: Duration,
    cancel: &CancellationToken,
    path: &str,
) -> Result<Vec<u8>, RmiError> {
    let deadline = Instant::now() + total;
    let heartbeat_len = CMD_HEARTBEAT.len() as u32;

    loop {
        if cancel.is_cancelled() {
            shared.state.set_download_progress(path, 0, 0, false);
            return Err(RmiError::Cancelled);
        }

        let mut header = [0u8; HEADER_LEN];
        if let Err(e) = transport.read_exact_by(&mut header, deadline, cancel).await {
            shared.state.set_download_progress(path, 0, 0, false);
            return Err(e);
        }
        let len = read_be32(&header);

        if len == 0 {
            shared.state.set_download_progress(path, 0, 0, false);
            return Ok(Vec::new());
        }

        if len == heartbeat_len {
            let mut payload = vec![0u8; len as usize];
            if let Err(e) = transport.read_exact_by(&mut payload, deadline, cancel).await {
                shared.state.set_download_progress(path, 0, 0, false);
                return Err(e);
            }
            if payload_equals(&payload, CMD_HEARTBEAT) {
                continue;
            }
            shared
                .state
                .set_download_progress(path, len as u64, len as u64, false);
            return Ok(payload);
        }

        shared.state.set_download_progress(path, 0, len as u64, true);
        let mut payload = vec![0u8; len as usize];
        let mut received = 0usize;
        let result = {
            let state = &shared.state;
            let mut on_progress = |n: usize| {
                received = n;
                state.set_download_progress(path, n as u64, len as u64, true);
            };
            transport
                .read_exact_with_progress(&mut payload, deadline, cancel, &mut on_progress)
                .await
        };
        if let Err(e) = result {
            shared
                .state
                .set_download_progress(path, received as u64, len as u64, false);
            return Err(e);
        }
        shared
            .state
            .set_download_progress(path, len as u64, len as u64, false);
        return Ok(payload);
    }
}

// ── Payload interpretation ───────────────────────────────────────

fn text_of(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

fn parse_version_payload(payload: &[u8]) -> Result<u32, String> {
    if payload_starts_with(payload, RESP_ERR_PREFIX) {
        return Err(text_of(payload));
    }
    let text = text_of(payload);
    let number = text
        .strip_prefix(RESP_VERSION_PREFIX)
        .ok_or_else(|| format!("unexpected VERSION response: {text}"))?;
    number
        .parse::<u32>()
        .map_err(|_| format!("invalid version number: {number}"))
}

fn publish_screencap(shared: &ClientShared, data: Vec<u8>) {
    if payload_starts_with(&data, RESP_ERR_PREFIX) {
        shared.state.set_error(text_of(&data));
        return;
    }
    if !png::has_png_signature(&data) {
        shared
            .state
            .set_error("unexpected screencap payload (not a PNG)");
        return;
    }
    let (width, height) = match png::png_dimensions(&data) {
        Ok(dims) => dims,
        Err(e) => {
            shared.state.set_error(e);
            return;
        }
    };
    if (width as u64) * (height as u64) > png::MAX_SCREENCAP_PIXELS {
        shared.state.set_error("PNG dimensions exceed limit");
        return;
    }

    match &shared.decoder {
        Some(decoder) => match decoder.decode_rgba(&data) {
            Ok(image) => {
                shared
                    .state
                    .publish_screencap(data, image.pixels, image.width, image.height);
            }
            Err(e) => shared.state.set_error(e),
        },
        // No decoder installed: publish the PNG and its header
        // dimensions; pixels stay empty.
        None => shared.state.publish_screencap(data, Vec::new(), width, height),
    }
}

// ── Tests ─────────────────────────────────────────────────────────
