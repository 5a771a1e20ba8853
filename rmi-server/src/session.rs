//! Per-client session loop.
//!
//! One accepted connection runs through a small state machine: the
//! first command must be a matching `AUTH`, after which commands are
//! dispatched against the table below. A 5 second readiness wait
//! multiplexes command handling with idle heartbeats.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use rmi_core::command::{
    Command, CommandParseError, CMD_HEARTBEAT, RESP_OK, RESP_VERSION_PREFIX,
};
use rmi_core::{frame, MAX_COMMAND_BYTES};

use crate::config::Credentials;
use crate::server::{BINARY_PATH, SERVER_VERSION};
use crate::{fs_ops, input, screencap};

/// Idle interval after which the server emits a heartbeat frame.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Failed authentication attempts tolerated before the session is
/// terminated with `ERR auth failed`.
pub const MAX_AUTH_ATTEMPTS: u32 = 3;

/// What the accept loop should do once a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Close this client and keep listening.
    Continue,
    /// Close everything and exit cleanly.
    Shutdown,
    /// Close everything and re-exec the server binary.
    Restart,
}

/// Drive one client session to completion.
pub async fn handle_client(stream: &mut TcpStream, creds: &Credentials) -> SessionOutcome {
    let mut authed = false;
    let mut attempts = 0u32;

    loop {
        // Readiness wait doubles as the idle heartbeat timer.
        match timeout(HEARTBEAT_INTERVAL, stream.readable()).await {
            Err(_) => {
                if frame::write_text(stream, CMD_HEARTBEAT).await.is_err() {
                    return SessionOutcome::Continue;
                }
                continue;
            }
            Ok(Err(_)) => return SessionOutcome::Continue,
            Ok(Ok(())) => {}
        }

        let len = match frame::read_header(stream).await {
            Ok(len) => len,
            Err(_) => return SessionOutcome::Continue,
        };
        if len == 0 {
            continue;
        }
        if len > MAX_COMMAND_BYTES {
            // Drain to keep the TCP stream aligned, then give up on
            // the session; a peer sending oversized commands is not
            // speaking this protocol.
            let _ = frame::drain(stream, len).await;
            warn!("oversized command frame ({len} bytes), closing session");
            return SessionOutcome::Continue;
        }
        let payload = match frame::read_payload(stream, len).await {
            Ok(p) => p,
            Err(_) => return SessionOutcome::Continue,
        };
        let text = String::from_utf8_lossy(&payload);
        let parsed = Command::parse(&text);

        if !authed {
            match parsed {
                Ok(Command::Auth { ref user, ref pass }) if creds.matches(user, pass) => {
                    if frame::write_text(stream, RESP_OK).await.is_err() {
                        return SessionOutcome::Continue;
                    }
                    debug!("client authenticated");
                    authed = true;
                }
                _ => {
                    attempts += 1;
                    if attempts >= MAX_AUTH_ATTEMPTS {
                        let _ = frame::write_text(stream, "ERR auth failed").await;
                        return SessionOutcome::Continue;
                    }
                    let _ = frame::write_text(stream, "ERR auth required").await;
                }
            }
            continue;
        }

        let command = match parsed {
            Ok(command) => command,
            Err(CommandParseError::Unknown) => {
                let _ = frame::write_text(stream, "ERR unknown command").await;
                continue;
            }
            Err(CommandParseError::BadArgs { op }) => {
                let _ = frame::write_text(stream, &format!("ERR {op}")).await;
                continue;
            }
        };

        match dispatch(stream, command).await {
            ControlFlow::Next => {}
            ControlFlow::End(outcome) => return outcome,
        }
    }
}

enum ControlFlow {
    Next,
    End(SessionOutcome),
}

async fn dispatch(stream: &mut TcpStream, command: Command) -> ControlFlow {
    debug!("dispatch: {command:?}");
    match command {
        Command::Quit => {
            let _ = frame::write_text(stream, RESP_OK).await;
            ControlFlow::End(SessionOutcome::Shutdown)
        }

        Command::Restart => {
            if let Err(e) = fs_ops::check_restart_permissions(BINARY_PATH) {
                warn!("restart refused: {e}");
                let _ = frame::write_text(stream, "ERR restart").await;
                return ControlFlow::Next;
            }
            let _ = frame::write_text(stream, RESP_OK).await;
            ControlFlow::End(SessionOutcome::Restart)
        }

        Command::Version => {
            let reply = format!("{RESP_VERSION_PREFIX}{SERVER_VERSION}");
            let _ = frame::write_text(stream, &reply).await;
            ControlFlow::Next
        }

        Command::Heartbeat => {
            let _ = frame::write_text(stream, RESP_OK).await;
            ControlFlow::Next
        }

        Command::Press(keycode) => {
            reply_result(stream, "press", input::send_keyevent(keycode)).await
        }

        Command::PressInput(keycode) => {
            reply_result(stream, "press", input::send_keyevent_input(keycode).await).await
        }

        Command::Open(package) => {
            reply_result(stream, "open", input::open_package(&package).await).await
        }

        Command::Upload { path, size } => {
            let result = fs_ops::receive_upload(stream, &path, size).await;
            reply_result(stream, "upload", result).await
        }

        Command::List(path) => {
            // On success the listing frame is the reply.
            match fs_ops::send_listing(stream, &path).await {
                Ok(()) => ControlFlow::Next,
                Err(e) => {
                    warn!("list {path} failed: {e}");
                    let _ = frame::write_text(stream, "ERR list").await;
                    ControlFlow::Next
                }
            }
        }

        Command::Download(path) => {
            // On success the handler sends `OK` plus the data frame.
            match fs_ops::send_download(stream, &path).await {
                Ok(()) => ControlFlow::Next,
                Err(e) => {
                    warn!("download {path} failed: {e}");
                    let _ = frame::write_text(stream, "ERR download").await;
                    ControlFlow::Next
                }
            }
        }

        Command::Delete(path) => {
            reply_result(stream, "delete", fs_ops::remove_path(&path).await).await
        }

        Command::Screencap => match screencap::send_screencap(stream).await {
            Ok(()) => ControlFlow::Next,
            Err(e) => {
                warn!("screencap failed: {e}");
                let _ = frame::write_text(stream, "ERR screencap").await;
                ControlFlow::Next
            }
        },

        // AUTH after authentication is not part of the dispatch table.
        Command::Auth { .. } => {
            let _ = frame::write_text(stream, "ERR unknown command").await;
            ControlFlow::Next
        }
    }
}

/// Send `OK` or `ERR <op>` for a handler that produces no payload.
async fn reply_result(
    stream: &mut TcpStream,
    op: &str,
    result: Result<(), rmi_core::RmiError>,
) -> ControlFlow {
    match result {
        Ok(()) => {
            let _ = frame::write_text(stream, RESP_OK).await;
        }
        Err(e) => {
            warn!("{op} failed: {e}");
            let _ = frame::write_text(stream, &format!("ERR {op}")).await;
        }
    }
    ControlFlow::Next
}
