//! Filesystem command handlers: LIST, DOWNLOAD, UPLOAD, DELETE, and
//! the restart precondition check.
//!
//! Upload has one special case: when the target is the server's own
//! binary, the payload is staged to `<path>.new`, made executable and
//! atomically renamed into place so the running process image is never
//! disturbed.

use std::os::unix::fs::PermissionsExt;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use rmi_core::command::RESP_OK;
use rmi_core::frame::{self, IO_CHUNK};
use rmi_core::listing::{render_line, FileEntry};
use rmi_core::{RmiError, LIST_MAX_BYTES};

use crate::server::BINARY_PATH;

// ── LIST ─────────────────────────────────────────────────────────

/// Enumerate one directory level and send the listing as one frame.
///
/// Directories become `D` lines, regular files `F` lines; everything
/// else is skipped. The rendered payload is capped at 1 MiB.
pub async fn send_listing(stream: &mut TcpStream, path: &str) -> Result<(), RmiError> {
    if path.is_empty() {
        return Err(RmiError::Protocol("empty path".into()));
    }

    let mut dir = tokio::fs::read_dir(path).await?;
    let mut out = String::new();
    while let Some(entry) = dir.next_entry().await? {
        // DirEntry metadata does not traverse symlinks.
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let line = if meta.is_dir() {
            render_line(&FileEntry::dir(name))
        } else if meta.is_file() {
            render_line(&FileEntry::file(name, meta.len()))
        } else {
            continue;
        };
        if out.len() + line.len() > LIST_MAX_BYTES {
            return Err(RmiError::Protocol("listing exceeds size cap".into()));
        }
        out.push_str(&line);
    }

    frame::write_text(stream, &out).await
}

// ── DOWNLOAD ─────────────────────────────────────────────────────

/// Send `OK` followed by one binary frame with the file's bytes,
/// streamed from disk in fixed-size chunks.
pub async fn send_download(stream: &mut TcpStream, path: &str) -> Result<(), RmiError> {
    if path.is_empty() {
        return Err(RmiError::Protocol("empty path".into()));
    }

    let mut file = tokio::fs::File::open(path).await?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(RmiError::Protocol("not a regular file".into()));
    }
    let size = meta.len();
    if size > u32::MAX as u64 {
        return Err(RmiError::Protocol("file too large for a single frame".into()));
    }

    frame::write_text(stream, RESP_OK).await?;

    stream.write_all(&frame::write_be32(size as u32)).await?;
    let mut remaining = size;
    let mut buf = [0u8; IO_CHUNK];
    while remaining > 0 {
        let want = (remaining as usize).min(IO_CHUNK);
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(RmiError::Protocol("file shrank during download".into()));
        }
        stream.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    stream.flush().await?;
    debug!("download {path}: {size} bytes sent");
    Ok(())
}

// ── UPLOAD ───────────────────────────────────────────────────────

/// Receive the announced data frame into `path`.
///
/// The inbound frame's length must equal the `size` argument of the
/// `UPLOAD` command; a mismatched frame is drained and rejected. Local
/// I/O failures also drain the remaining payload so the next command
/// frame stays aligned.
pub async fn receive_upload(
    stream: &mut TcpStream,
    path: &str,
    expected: u32,
) -> Result<(), RmiError> {
    let len = frame::read_header(stream).await?;
    if len != expected {
        let _ = frame::drain(stream, len).await;
        return Err(RmiError::Protocol(format!(
            "announced {expected} bytes but framed {len}"
        )));
    }

    let self_target = is_self_binary_path(path);
    let write_path = if self_target {
        format!("{path}.new")
    } else {
        path.to_string()
    };

    let mut file = match tokio::fs::File::create(&write_path).await {
        Ok(file) => file,
        Err(e) => {
            let _ = frame::drain(stream, len).await;
            return Err(RmiError::Io(e));
        }
    };

    let mut remaining = len;
    let mut buf = [0u8; IO_CHUNK];
    while remaining > 0 {
        let chunk = (remaining as usize).min(IO_CHUNK);
        if let Err(e) = stream.read_exact(&mut buf[..chunk]).await {
            // The socket itself failed; nothing left to drain.
            return Err(RmiError::Io(e));
        }
        if let Err(e) = file.write_all(&buf[..chunk]).await {
            drop(file);
            let _ = tokio::fs::remove_file(&write_path).await;
            let _ = frame::drain(stream, remaining - chunk as u32).await;
            return Err(RmiError::Io(e));
        }
        remaining -= chunk as u32;
    }
    file.flush().await?;
    drop(file);

    if self_target {
        if let Err(e) =
            tokio::fs::set_permissions(&write_path, std::fs::Permissions::from_mode(0o777)).await
        {
            let _ = tokio::fs::remove_file(&write_path).await;
            return Err(RmiError::Io(e));
        }
        if let Err(e) = tokio::fs::rename(&write_path, path).await {
            let _ = tokio::fs::remove_file(&write_path).await;
            return Err(RmiError::Io(e));
        }
        debug!("self-upload staged and renamed into {path}");
    } else {
        debug!("upload {path}: {len} bytes written");
    }
    Ok(())
}

/// Whether `path` refers to the server's own binary, either via
/// `/proc/self/exe` (with the kernel's `" (deleted)"` suffix stripped),
/// the process argv fallback, or the canonical install path.
pub fn is_self_binary_path(path: &str) -> bool {
    if let Some(self_path) = self_exe_path() {
        if path == self_path {
            return true;
        }
    }
    path == BINARY_PATH
}

fn self_exe_path() -> Option<String> {
    let raw = std::fs::read_link("/proc/self/exe")
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::args().next())?;
    Some(match raw.strip_suffix(" (deleted)") {
        Some(stripped) => stripped.to_string(),
        None => raw,
    })
}

// ── DELETE ───────────────────────────────────────────────────────

/// Recursively remove a path. The filesystem root is refused.
pub async fn remove_path(path: &str) -> Result<(), RmiError> {
    if path.is_empty() || path == "/" {
        return Err(RmiError::Protocol("refusing to delete root".into()));
    }
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

// ── RESTART precondition ─────────────────────────────────────────

/// `RESTART` is honored only when the on-disk binary is a regular file
/// with permission bits exactly 0777.
pub fn check_restart_permissions(binary_path: &str) -> Result<(), RmiError> {
    let meta = std::fs::metadata(binary_path)?;
    if !meta.is_file() {
        return Err(RmiError::Protocol(format!(
            "{binary_path} is not a regular file"
        )));
    }
    let mode = meta.permissions().mode() & 0o777;
    if mode != 0o777 {
        warn!("{binary_path} has mode {mode:o}, expected 777");
        return Err(RmiError::Protocol(format!(
            "{binary_path} has mode {mode:o}, expected 777"
        )));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────
