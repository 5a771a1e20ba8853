//! Directory listing wire grammar.
//!
//! A `LIST` reply is a single frame of newline-terminated lines:
//!
//! ```text
//! entry  := dir | file
//! dir    := "D\t" <name> "\n"
//! file   := "F\t" <name> "\t" <decimal_size> "\n"
//! ```
//!
//! Names never contain tabs or newlines. The server renders, the
//! client parses; both ends live here so the grammar cannot drift.

use crate::command::RESP_ERR_PREFIX;
use crate::error::RmiError;
use crate::frame::payload_starts_with;

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

impl FileEntry {
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: 0,
        }
    }

    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
        }
    }
}

/// Render one listing line.
pub fn render_line(entry: &FileEntry) -> String {
    if entry.is_dir {
        format!("D\t{}\n", entry.name)
    } else {
        format!("F\t{}\t{}\n", entry.name, entry.size)
    }
}

/// Render a complete listing payload.
pub fn render(entries: &[FileEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&render_line(entry));
    }
    out
}

/// Parse a listing payload into entries.
///
/// A payload starting with `ERR` is the server's command failure and is
/// surfaced verbatim. Malformed lines are a protocol error for the
/// whole payload. Entries with empty names are skipped.
pub fn parse(payload: &[u8]) -> Result<Vec<FileEntry>, RmiError> {
    if payload_starts_with(payload, RESP_ERR_PREFIX) {
        let text = String::from_utf8_lossy(payload).into_owned();
        return Err(RmiError::Protocol(text));
    }

    let text = std::str::from_utf8(payload)
        .map_err(|_| RmiError::Protocol("listing is not valid UTF-8".into()))?;

    let mut entries = Vec::new();
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        let bytes = line.as_bytes();
        if bytes.len() < 3 || bytes[1] != b'\t' {
            return Err(RmiError::Protocol("malformed list entry".into()));
        }
        let rest = &line[2..];
        let entry = match bytes[0] {
            b'D' => FileEntry::dir(rest),
            b'F' => {
                let (name, size_text) = rest
                    .split_once('\t')
                    .ok_or_else(|| RmiError::Protocol("malformed file entry".into()))?;
                let size: u64 = size_text
                    .parse()
                    .map_err(|_| RmiError::Protocol("invalid file size".into()))?;
                FileEntry::file(name, size)
            }
            _ => return Err(RmiError::Protocol("unknown list entry type".into())),
        };
        if entry.name.is_empty() {
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

// ── Tests ─────────────────────────────────────────────────────────
