//! Command taxonomy and reply constants.
//!
//! Commands are textual payloads whose first whitespace-delimited token
//! selects the operation; remaining tokens are operation-specific.
//! Paths never contain whitespace. The original dispatcher was a
//! token-match chain; this is the equivalent static parse into a typed
//! enum, which gives identical behavior with better locality.

use std::fmt;

// ── Command keywords ─────────────────────────────────────────────

pub const CMD_AUTH: &str = "AUTH";
pub const CMD_QUIT: &str = "QUIT";
pub const CMD_RESTART: &str = "RESTART";
pub const CMD_VERSION: &str = "VERSION";
pub const CMD_PRESS: &str = "PRESS";
pub const CMD_PRESS_INPUT: &str = "PRESS_INPUT";
pub const CMD_OPEN: &str = "OPEN";
pub const CMD_UPLOAD: &str = "UPLOAD";
pub const CMD_LIST: &str = "LIST";
pub const CMD_DOWNLOAD: &str = "DOWNLOAD";
pub const CMD_DELETE: &str = "DELETE";
pub const CMD_SCREENCAP: &str = "SCREENCAP";
pub const CMD_HEARTBEAT: &str = "HEARTBEAT";

// ── Reply constants ──────────────────────────────────────────────

pub const RESP_OK: &str = "OK";
pub const RESP_ERR_PREFIX: &str = "ERR";
pub const RESP_VERSION_PREFIX: &str = "VERSION ";

// ── Command ──────────────────────────────────────────────────────

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Credentials presented at the start of a session.
    Auth { user: String, pass: String },
    /// Shut the server down after replying `OK`.
    Quit,
    /// Re-exec the server binary with its original arguments.
    Restart,
    /// Query the compiled-in server version.
    Version,
    /// Inject a key press directly into the input device node.
    Press(i32),
    /// Inject a key press through the platform `input` utility.
    PressInput(i32),
    /// Launch an application by package name (best effort).
    Open(String),
    /// Receive `size` bytes in the next frame and write them to `path`.
    Upload { path: String, size: u32 },
    /// Enumerate one directory level.
    List(String),
    /// Stream a regular file back as a binary frame.
    Download(String),
    /// Recursively remove a path.
    Delete(String),
    /// Capture the screen as PNG and stream it back.
    Screencap,
    /// Keepalive; replied to with `OK`.
    Heartbeat,
}

/// Why a command payload failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    /// The keyword is not part of the command set.
    Unknown,
    /// The keyword is known but the arguments are malformed. `op` is
    /// the lowercase word used in the server's `ERR <op>` reply.
    BadArgs { op: &'static str },
}

impl fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandParseError::Unknown => write!(f, "unknown command"),
            CommandParseError::BadArgs { op } => write!(f, "malformed {op} arguments"),
        }
    }
}

impl Command {
    /// Parse a textual command payload.
    ///
    /// Keyword comparison is byte-exact; integer arguments must consume
    /// their whole token in base 10.
    pub fn parse(text: &str) -> Result<Command, CommandParseError> {
        let mut tokens = text.split_ascii_whitespace();
        let keyword = tokens.next().ok_or(CommandParseError::Unknown)?;

        match keyword {
            CMD_AUTH => {
                let user = tokens.next();
                let pass = tokens.next();
                match (user, pass) {
                    (Some(u), Some(p)) => Ok(Command::Auth {
                        user: u.to_string(),
                        pass: p.to_string(),
                    }),
                    _ => Err(CommandParseError::BadArgs { op: "auth" }),
                }
            }
            CMD_QUIT => Ok(Command::Quit),
            CMD_RESTART => Ok(Command::Restart),
            CMD_VERSION => Ok(Command::Version),
            CMD_HEARTBEAT => Ok(Command::Heartbeat),
            CMD_SCREENCAP => Ok(Command::Screencap),
            CMD_PRESS => parse_keycode(tokens.next(), "press").map(Command::Press),
            CMD_PRESS_INPUT => parse_keycode(tokens.next(), "press").map(Command::PressInput),
            CMD_OPEN => match tokens.next() {
                Some(pkg) => Ok(Command::Open(pkg.to_string())),
                None => Err(CommandParseError::BadArgs { op: "open" }),
            },
            CMD_UPLOAD => {
                let path = tokens.next();
                let size = tokens.next();
                match (path, size) {
                    (Some(path), Some(size)) => {
                        let size: u32 = size
                            .parse()
                            .map_err(|_| CommandParseError::BadArgs { op: "upload" })?;
                        Ok(Command::Upload {
                            path: path.to_string(),
                            size,
                        })
                    }
                    _ => Err(CommandParseError::BadArgs { op: "upload" }),
                }
            }
            CMD_LIST => parse_path(tokens.next(), "list").map(Command::List),
            CMD_DOWNLOAD => parse_path(tokens.next(), "download").map(Command::Download),
            CMD_DELETE => parse_path(tokens.next(), "delete").map(Command::Delete),
            _ => Err(CommandParseError::Unknown),
        }
    }

    /// The `ERR <op>` word the server uses when this command's handler
    /// fails.
    pub fn err_op(&self) -> &'static str {
        match self {
            Command::Auth { .. } => "auth",
            Command::Quit => "quit",
            Command::Restart => "restart",
            Command::Version => "version",
            Command::Press(_) | Command::PressInput(_) => "press",
            Command::Open(_) => "open",
            Command::Upload { .. } => "upload",
            Command::List(_) => "list",
            Command::Download(_) => "download",
            Command::Delete(_) => "delete",
            Command::Screencap => "screencap",
            Command::Heartbeat => "heartbeat",
        }
    }
}

fn parse_keycode(token: Option<&str>, op: &'static str) -> Result<i32, CommandParseError> {
    token
        .and_then(|t| t.parse::<i32>().ok())
        .ok_or(CommandParseError::BadArgs { op })
}

fn parse_path(token: Option<&str>, op: &'static str) -> Result<String, CommandParseError> {
    match token {
        Some(path) if !path.is_empty() => Ok(path.to_string()),
        _ => Err(CommandParseError::BadArgs { op }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────
