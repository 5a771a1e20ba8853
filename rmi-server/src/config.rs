//! Server credentials file.
//!
//! Plain text, key/value lines with optional comments:
//!
//! ```text
//! # comment (';' also starts a comment)
//! username=<shell-safe text>
//! password=<shell-safe text>
//! ```
//!
//! If the file is absent it is created with default credentials and
//! mode 0666 so a shell user on the device can edit it. Fallback
//! grammars accepted for hand-written files: `user:pass` on one line,
//! two whitespace-separated tokens on one line, then two separate
//! lines.

use std::os::unix::fs::PermissionsExt;

use tracing::info;

/// On-device path of the credentials file.
pub const CONFIG_PATH: &str = "/data/local/tmp/rmi.config";

pub const DEFAULT_USER: &str = "l16";
pub const DEFAULT_PASS: &str = "l16";

/// Credentials a client must present in its `AUTH` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn matches(&self, user: &str, pass: &str) -> bool {
        self.username == user && self.password == pass
    }
}

/// Load credentials from `path`, writing a default config first if the
/// file does not exist.
pub fn load_or_create(path: &str) -> std::io::Result<Credentials> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse(&contents).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("config {path} is missing username/password"),
            )
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            write_default(path)?;
            info!("created default config: {path}");
            Ok(Credentials {
                username: DEFAULT_USER.to_string(),
                password: DEFAULT_PASS.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

fn write_default(path: &str) -> std::io::Result<()> {
    std::fs::write(
        path,
        format!("username={DEFAULT_USER}\npassword={DEFAULT_PASS}\n"),
    )?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
}

/// Parse the credentials grammar. Returns `None` when either field is
/// missing or empty.
pub fn parse(contents: &str) -> Option<Credentials> {
    let mut user = String::new();
    let mut pass = String::new();

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(value) = line.strip_prefix("username=") {
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            user = value.to_string();
            continue;
        }
        if let Some(value) = line.strip_prefix("password=") {
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            pass = value.to_string();
            continue;
        }

        // Fallbacks only engage while the keyed form has filled nothing.
        if user.is_empty() && pass.is_empty() {
            let (u, p) = match line.split_once(':') {
                Some(pair) => pair,
                None => match line.split_once(char::is_whitespace) {
                    Some(pair) => pair,
                    None => {
                        // Single bare token: first line is the user,
                        // a later line supplies the password.
                        user = line.to_string();
                        continue;
                    }
                },
            };
            let (u, p) = (u.trim(), p.trim());
            if u.is_empty() || p.is_empty() {
                return None;
            }
            user = u.to_string();
            pass = p.to_string();
            continue;
        }

        if pass.is_empty() {
            pass = line.to_string();
        }
    }

    if user.is_empty() || pass.is_empty() {
        return None;
    }
    Some(Credentials {
        username: user,
        password: pass,
    })
}

// ── Tests ─────────────────────────────────────────────────────────
