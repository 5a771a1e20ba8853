//! Blocking-style TCP transport with bounded waits.
//!
//! `Transport` owns the session socket. Reads are performed in steps of
//! at most [`READ_STEP`] under an enclosing deadline, and every step
//! consults the caller's [`CancellationToken`], so a worker shutdown is
//! observed within roughly one step even in the middle of a large
//! transfer. A timed-out step consumes nothing: a single `read` future
//! only takes bytes out of the socket when it completes.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::RmiError;
use crate::frame::{self, HEADER_LEN};

/// Upper bound for a single receive step.
pub const READ_STEP: Duration = Duration::from_secs(1);

/// Outcome of a single bounded receive step.
#[derive(Debug)]
pub enum RecvStep {
    /// `n` bytes were received.
    Data(usize),
    /// The step timeout elapsed with nothing to read.
    Timeout,
}

/// A connected TCP session socket.
#[derive(Debug)]
pub struct Transport {
    stream: TcpStream,
}

impl Transport {
    /// Resolve `host:port` and attempt every candidate address in
    /// order, yielding the first successful connection.
    pub async fn connect(host: &str, port: u16) -> Result<Self, RmiError> {
        let candidates = lookup_host((host, port))
            .await
            .map_err(|e| RmiError::Connect(format!("resolve failed: {e}")))?;

        let mut last_error = None;
        for addr in candidates {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(Self { stream });
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(RmiError::Connect(match last_error {
            Some(e) => e.to_string(),
            None => format!("no addresses resolved for {host}:{port}"),
        }))
    }

    /// Wrap an already-connected stream (test endpoints, accept side).
    pub fn from_stream(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self { stream }
    }

    // ── Writing ──────────────────────────────────────────────────

    /// Write the whole buffer or fail.
    pub async fn send_all(&mut self, bytes: &[u8]) -> Result<(), RmiError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Frame and send a payload as one contiguous write.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), RmiError> {
        if payload.len() > u32::MAX as usize {
            return Err(RmiError::Protocol("payload too large to send".into()));
        }
        self.send_all(&frame::encode(payload)).await
    }

    /// Frame and send a textual payload.
    pub async fn send_text(&mut self, text: &str) -> Result<(), RmiError> {
        self.send_frame(text.as_bytes()).await
    }

    // ── Reading ──────────────────────────────────────────────────

    /// One bounded receive step: read whatever is available within
    /// `step`, mapping an orderly zero-read to `ConnectionClosed`.
    async fn recv_step(&mut self, buf: &mut [u8], step: Duration) -> Result<RecvStep, RmiError> {
        match timeout(step, self.stream.read(buf)).await {
            Err(_) => Ok(RecvStep::Timeout),
            Ok(Ok(0)) => Err(RmiError::ConnectionClosed),
            Ok(Ok(n)) => Ok(RecvStep::Data(n)),
            Ok(Err(e)) => Err(RmiError::Io(e)),
        }
    }

    /// Fill `buf` completely before `deadline`, polling the stop token
    /// at every step boundary.
    pub async fn read_exact_by(
        &mut self,
        buf: &mut [u8],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), RmiError> {
        self.read_exact_inner(buf, deadline, cancel, &mut |_| {}).await
    }

    /// Same as [`read_exact_by`], invoking `progress` with the running
    /// byte count after every successful step. Used by the download
    /// path so observers can watch a large transfer advance.
    ///
    /// [`read_exact_by`]: Self::read_exact_by
    pub async fn read_exact_with_progress(
        &mut self,
        buf: &mut [u8],
        deadline: Instant,
        cancel: &CancellationToken,
        progress: &mut (dyn FnMut(usize) + Send),
    ) -> Result<(), RmiError> {
        self.read_exact_inner(buf, deadline, cancel, progress).await
    }

    async fn read_exact_inner(
        &mut self,
        buf: &mut [u8],
        deadline: Instant,
        cancel: &CancellationToken,
        progress: &mut (dyn FnMut(usize) + Send),
    ) -> Result<(), RmiError> {
        let mut offset = 0usize;
        while offset < buf.len() {
            if cancel.is_cancelled() {
                return Err(RmiError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RmiError::Timeout);
            }
            let step = READ_STEP.min(deadline - now);

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RmiError::Cancelled),
                r = self.recv_step(&mut buf[offset..], step) => r,
            };
            match result? {
                RecvStep::Timeout => continue,
                RecvStep::Data(n) => {
                    offset += n;
                    progress(offset);
                }
            }
        }
        Ok(())
    }

    /// Read one complete frame under a deadline, enforcing a payload
    /// cap (`max == 0` means uncapped).
    pub async fn read_frame_by(
        &mut self,
        deadline: Instant,
        max: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RmiError> {
        let mut header = [0u8; HEADER_LEN];
        self.read_exact_by(&mut header, deadline, cancel).await?;
        let len = frame::read_be32(&header);
        if max > 0 && len > max {
            return Err(RmiError::FrameTooLarge { len, max });
        }
        let mut payload = vec![0u8; len as usize];
        if len > 0 {
            self.read_exact_by(&mut payload, deadline, cancel).await?;
        }
        Ok(payload)
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (Transport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = Transport::connect(&addr.ip().to_string(), addr.port())
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn connect_and_roundtrip() {
        let (mut client, mut server) = pair().await;

        client.send_text("HEARTBEAT").await.unwrap();
        let got = frame::read_frame(&mut server, 0).await.unwrap();
        assert_eq!(got, b"HEARTBEAT");

        frame::write_text(&mut server, "OK").await.unwrap();
        let cancel = CancellationToken::new();
        let reply = client
            .read_frame_by(Instant::now() + Duration::from_secs(2), 256, &cancel)
            .await
            .unwrap();
        assert_eq!(reply, b"OK");
    }

    #[tokio::test]
    async fn connect_refused() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Transport::connect(&addr.ip().to_string(), addr.port()).await;
        assert!(matches!(err, Err(RmiError::Connect(_))));
    }

    #[tokio::test]
    async fn read_deadline_expires() {
        let (mut client, _server) = pair().await;
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let err = client
            .read_frame_by(Instant::now() + Duration::from_millis(150), 256, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RmiError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancellation_is_prompt() {
        let (mut client, _server) = pair().await;
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let started = Instant::now();
        let err = client
            .read_frame_by(Instant::now() + Duration::from_secs(30), 0, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RmiError::Cancelled));
        // Must exit well within one read step of the cancel.
        assert!(started.elapsed() < READ_STEP + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn closed_peer_detected() {
        let (mut client, server) = pair().await;
        drop(server);
        let cancel = CancellationToken::new();
        let err = client
            .read_frame_by(Instant::now() + Duration::from_secs(2), 0, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RmiError::ConnectionClosed));
    }

    #[tokio::test]
    async fn progress_reader_reports_growth() {
        let (mut client, mut server) = pair().await;

        let body = vec![0x5Au8; 32 * 1024];
        frame::write_frame(&mut server, &body).await.unwrap();

        let cancel = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut header = [0u8; HEADER_LEN];
        client
            .read_exact_by(&mut header, deadline, &cancel)
            .await
            .unwrap();
        assert_eq!(frame::read_be32(&header) as usize, body.len());

        let mut seen = Vec::new();
        let mut payload = vec![0u8; body.len()];
        client
            .read_exact_with_progress(&mut payload, deadline, &cancel, &mut |n| seen.push(n))
            .await
            .unwrap();
        assert_eq!(payload, body);
        assert_eq!(*seen.last().unwrap(), body.len());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
