//! Accept loop and process lifecycle.
//!
//! The server handles exactly one accepted connection at a time; the
//! session outcome decides whether to keep listening, shut down, or
//! re-exec the process image with its original arguments.

use std::ffi::OsString;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Credentials;
use crate::session::{self, SessionOutcome};

/// Default listen port when none is given on the command line.
pub const DEFAULT_PORT: u16 = 1234;

/// On-device path of the server binary; `RESTART` verifies this and
/// self-uploads stage next to it.
pub const BINARY_PATH: &str = "/data/local/tmp/rmi";

/// Append-only device log that stdout/stderr are redirected to.
pub const LOG_PATH: &str = "/data/local/tmp/rmi.log";

/// Compiled-in version reported by the `VERSION` command.
pub const SERVER_VERSION: u32 = 7;

/// Process-wide state captured once at startup.
#[derive(Debug)]
pub struct ServerContext {
    /// The original argument vector, kept verbatim for `RESTART`.
    pub argv: Vec<OsString>,
    pub credentials: Credentials,
}

/// Bind and serve until `QUIT` or a fatal accept error.
pub async fn run(ctx: ServerContext, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("RMI command server listening on 0.0.0.0:{port}");

    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("accept error: {e}");
                break;
            }
        };
        info!("client connected from {peer}");

        let outcome = session::handle_client(&mut stream, &ctx.credentials).await;
        drop(stream);

        match outcome {
            SessionOutcome::Continue => {
                info!("client session ended");
            }
            SessionOutcome::Shutdown => {
                info!("shutting down on QUIT");
                break;
            }
            SessionOutcome::Restart => {
                info!("restarting with original arguments");
                drop(listener);
                restart(&ctx.argv);
            }
        }
    }

    Ok(())
}

/// Replace the process image with the stored argv. Never returns; a
/// failed exec is a fatal error.
fn restart(argv: &[OsString]) -> ! {
    use std::os::unix::process::CommandExt;

    if argv.is_empty() {
        error!("restart failed: missing argv");
        std::process::exit(1);
    }
    let err = std::process::Command::new(&argv[0]).args(&argv[1..]).exec();
    error!("restart failed: {err}");
    std::process::exit(1);
}
