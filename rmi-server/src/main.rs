//! RMI device command server.
//!
//! Binds a TCP listener, accepts one client at a time and serves the
//! framed command protocol. Stdout/stderr are re-opened onto the
//! append-only device log before anything else so that spawned
//! children (screencap, input) log into the same file.

use std::ffi::OsString;

use anyhow::{bail, Context};
use clap::Parser;

use rmi_server::server::{self, ServerContext, DEFAULT_PORT, LOG_PATH};
use rmi_server::config;

#[derive(Parser)]
#[command(name = "rmi-server", about = "RMI device command server")]
struct Cli {
    /// TCP port to listen on.
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    redirect_logs(LOG_PATH);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    if cli.port == 0 {
        bail!("invalid port");
    }

    let argv: Vec<OsString> = std::env::args_os().collect();
    let credentials = config::load_or_create(config::CONFIG_PATH)
        .context("loading server credentials")?;

    let ctx = ServerContext { argv, credentials };
    server::run(ctx, cli.port).await
}

/// Re-open stdout and stderr onto the append-only device log.
///
/// Child processes inherit the redirected descriptors, so their
/// diagnostics land in the same file. Best effort: if the log cannot
/// be opened the server keeps the inherited descriptors.
fn redirect_logs(path: &str) {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    use std::os::unix::io::AsRawFd;

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o666)
        .open(path)
    {
        Ok(f) => f,
        Err(_) => return,
    };
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666));

    let fd = file.as_raw_fd();
    unsafe {
        libc::dup2(fd, libc::STDOUT_FILENO);
        libc::dup2(fd, libc::STDERR_FILENO);
    }
    // `file` drops here; the dup'd descriptors stay open.
}
