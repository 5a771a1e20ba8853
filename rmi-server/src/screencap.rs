//! Screen capture via the platform `screencap` utility.

use std::process::Stdio;

use tokio::net::TcpStream;
use tracing::debug;

use rmi_core::{frame, RmiError};

const SCREENCAP_BIN: &str = "/system/bin/screencap";

/// Run `screencap -p`, collect the PNG from its stdout and send it as
/// a single frame. Stderr is inherited so capture diagnostics land in
/// the device log.
pub async fn send_screencap(stream: &mut TcpStream) -> Result<(), RmiError> {
    let output = tokio::process::Command::new(SCREENCAP_BIN)
        .arg("-p")
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .await?;

    if !output.status.success() {
        return Err(RmiError::Protocol(format!(
            "screencap exited with {}",
            output.status
        )));
    }
    let data = output.stdout;
    if data.is_empty() {
        return Err(RmiError::Protocol("screencap produced no output".into()));
    }
    if data.len() > u32::MAX as usize {
        return Err(RmiError::Protocol("screencap output too large".into()));
    }

    debug!("screencap: {} bytes captured", data.len());
    frame::write_frame(stream, &data).await
}
