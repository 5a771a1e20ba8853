//! Session-level integration tests: a scripted client drives a live
//! session over a localhost TCP connection and asserts the exact frame
//! sequences of the wire protocol.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use rmi_core::frame;
use rmi_core::listing;
use rmi_server::config::Credentials;
use rmi_server::session::{handle_client, SessionOutcome};

// ── Helpers ──────────────────────────────────────────────────────

const USER: &str = "l16";
const PASS: &str = "l16";

/// Spin up a session task on an accepted localhost connection and
/// return the scripted client's end of the socket.
async fn start_session() -> (TcpStream, JoinHandle<SessionOutcome>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (mut server_stream, _) = listener.accept().await.unwrap();

    let handle = tokio::spawn(async move {
        let creds = Credentials {
            username: USER.to_string(),
            password: PASS.to_string(),
        };
        handle_client(&mut server_stream, &creds).await
    });
    (client, handle)
}

async fn send(client: &mut TcpStream, text: &str) {
    frame::write_text(client, text).await.unwrap();
}

async fn recv(client: &mut TcpStream) -> Vec<u8> {
    timeout(Duration::from_secs(10), frame::read_frame(client, 0))
        .await
        .expect("timed out waiting for a reply frame")
        .expect("reply frame")
}

async fn recv_text(client: &mut TcpStream) -> String {
    String::from_utf8(recv(client).await).unwrap()
}

async fn authenticate(client: &mut TcpStream) {
    send(client, &format!("AUTH {USER} {PASS}")).await;
    assert_eq!(recv_text(client).await, "OK");
}

// ── Authentication ───────────────────────────────────────────────

#[tokio::test]
async fn auth_success() {
    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;
}

#[tokio::test]
async fn auth_failure_escalation() {
    let (mut client, handle) = start_session().await;

    send(&mut client, "AUTH bad bad").await;
    assert_eq!(recv_text(&mut client).await, "ERR auth required");
    send(&mut client, "AUTH bad bad").await;
    assert_eq!(recv_text(&mut client).await, "ERR auth required");
    send(&mut client, "AUTH bad bad").await;
    assert_eq!(recv_text(&mut client).await, "ERR auth failed");

    // The session is gone; the next read observes transport close.
    let err = timeout(Duration::from_secs(5), frame::read_frame(&mut client, 0))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, rmi_core::RmiError::ConnectionClosed));
    assert_eq!(handle.await.unwrap(), SessionOutcome::Continue);
}

#[tokio::test]
async fn non_auth_command_counts_as_attempt() {
    let (mut client, _handle) = start_session().await;

    send(&mut client, "VERSION").await;
    assert_eq!(recv_text(&mut client).await, "ERR auth required");

    // A correct AUTH still works afterwards.
    authenticate(&mut client).await;
}

#[tokio::test]
async fn pre_auth_heartbeats_count_but_correct_auth_still_lands() {
    let (mut client, handle) = start_session().await;

    // Heartbeats before AUTH are failed attempts.
    for _ in 0..2 {
        send(&mut client, "HEARTBEAT").await;
        assert_eq!(recv_text(&mut client).await, "ERR auth required");
    }
    // The counter only advances on failures, so correct credentials
    // on what would be the third attempt still authenticate.
    send(&mut client, &format!("AUTH {USER} {PASS}")).await;
    assert_eq!(recv_text(&mut client).await, "OK");
    drop(client);
    assert_eq!(handle.await.unwrap(), SessionOutcome::Continue);
}

// ── Simple commands ──────────────────────────────────────────────

#[tokio::test]
async fn version_reply() {
    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    send(&mut client, "VERSION").await;
    assert_eq!(
        recv_text(&mut client).await,
        format!("VERSION {}", rmi_server::server::SERVER_VERSION)
    );
}

#[tokio::test]
async fn heartbeat_exchanges_leave_session_usable() {
    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    send(&mut client, "HEARTBEAT").await;
    assert_eq!(recv_text(&mut client).await, "OK");
    send(&mut client, "HEARTBEAT").await;
    assert_eq!(recv_text(&mut client).await, "OK");

    send(&mut client, "VERSION").await;
    assert!(recv_text(&mut client).await.starts_with("VERSION "));
}

#[tokio::test]
async fn unknown_and_malformed_commands() {
    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    send(&mut client, "FROBNICATE").await;
    assert_eq!(recv_text(&mut client).await, "ERR unknown command");

    send(&mut client, "PRESS notakey").await;
    assert_eq!(recv_text(&mut client).await, "ERR press");

    send(&mut client, "UPLOAD /tmp/x").await;
    assert_eq!(recv_text(&mut client).await, "ERR upload");

    // Lowercase keywords are not keywords.
    send(&mut client, "version").await;
    assert_eq!(recv_text(&mut client).await, "ERR unknown command");
}

#[tokio::test]
async fn quit_shuts_the_server_down() {
    let (mut client, handle) = start_session().await;
    authenticate(&mut client).await;

    send(&mut client, "QUIT").await;
    assert_eq!(recv_text(&mut client).await, "OK");
    assert_eq!(handle.await.unwrap(), SessionOutcome::Shutdown);
}

#[tokio::test]
async fn restart_refused_without_prepared_binary() {
    // The canonical binary path does not exist (or is not 0777) on a
    // test host, so the precondition check rejects the restart.
    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    send(&mut client, "RESTART").await;
    assert_eq!(recv_text(&mut client).await, "ERR restart");
}

// ── File transfer ────────────────────────────────────────────────

#[tokio::test]
async fn upload_then_download_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let remote = dir.path().join("payload.bin");
    let remote = remote.to_str().unwrap();
    let content: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    send(&mut client, &format!("UPLOAD {remote} {}", content.len())).await;
    frame::write_frame(&mut client, &content).await.unwrap();
    assert_eq!(recv_text(&mut client).await, "OK");
    assert_eq!(std::fs::read(remote).unwrap(), content);

    send(&mut client, &format!("DOWNLOAD {remote}")).await;
    assert_eq!(recv_text(&mut client).await, "OK");
    let body = recv(&mut client).await;
    assert_eq!(body, content);
}

#[tokio::test]
async fn upload_size_mismatch_keeps_stream_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let remote = dir.path().join("short.bin");
    let remote = remote.to_str().unwrap();

    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    // Announce 10 bytes but frame only 4.
    send(&mut client, &format!("UPLOAD {remote} 10")).await;
    frame::write_frame(&mut client, b"1234").await.unwrap();
    assert_eq!(recv_text(&mut client).await, "ERR upload");

    // The mismatched frame was drained; the session still works.
    send(&mut client, "HEARTBEAT").await;
    assert_eq!(recv_text(&mut client).await, "OK");
}

#[tokio::test]
async fn upload_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let remote = dir.path().join("empty");
    let remote = remote.to_str().unwrap();

    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    send(&mut client, &format!("UPLOAD {remote} 0")).await;
    frame::write_frame(&mut client, b"").await.unwrap();
    assert_eq!(recv_text(&mut client).await, "OK");
    assert_eq!(std::fs::metadata(remote).unwrap().len(), 0);
}

#[tokio::test]
async fn download_rejects_missing_and_non_regular() {
    let dir = tempfile::tempdir().unwrap();

    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    let missing = dir.path().join("missing");
    send(&mut client, &format!("DOWNLOAD {}", missing.display())).await;
    assert_eq!(recv_text(&mut client).await, "ERR download");

    send(&mut client, &format!("DOWNLOAD {}", dir.path().display())).await;
    assert_eq!(recv_text(&mut client).await, "ERR download");
}

#[tokio::test]
async fn list_then_delete_shrinks_listing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("a.bin"), vec![0u8; 812]).unwrap();
    std::fs::write(dir.path().join("b.txt"), b"hello").unwrap();
    let dir_path = dir.path().to_str().unwrap();

    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    send(&mut client, &format!("LIST {dir_path}")).await;
    let entries = listing::parse(&recv(&mut client).await).unwrap();
    assert_eq!(entries.len(), 3);
    let a = entries.iter().find(|e| e.name == "a.bin").unwrap();
    assert!(!a.is_dir);
    assert_eq!(a.size, 812);
    assert!(entries.iter().any(|e| e.name == "sub" && e.is_dir));

    let victim = dir.path().join("a.bin");
    send(&mut client, &format!("DELETE {}", victim.display())).await;
    assert_eq!(recv_text(&mut client).await, "OK");

    send(&mut client, &format!("LIST {dir_path}")).await;
    let after = listing::parse(&recv(&mut client).await).unwrap();
    assert_eq!(after.len(), 2);
    assert!(!after.iter().any(|e| e.name == "a.bin"));
}

#[tokio::test]
async fn list_missing_directory_is_an_error() {
    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    send(&mut client, "LIST /definitely/not/here").await;
    assert_eq!(recv_text(&mut client).await, "ERR list");
}

#[tokio::test]
async fn delete_refuses_root() {
    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    send(&mut client, "DELETE /").await;
    assert_eq!(recv_text(&mut client).await, "ERR delete");
}

// ── Framing edge cases ───────────────────────────────────────────

#[tokio::test]
async fn empty_frames_are_ignored() {
    let (mut client, _handle) = start_session().await;

    frame::write_frame(&mut client, b"").await.unwrap();
    frame::write_frame(&mut client, b"").await.unwrap();
    // Still possible to authenticate afterwards; empty frames did not
    // consume auth attempts.
    authenticate(&mut client).await;
}

#[tokio::test]
async fn oversized_command_frame_closes_session() {
    let (mut client, handle) = start_session().await;
    authenticate(&mut client).await;

    let oversized = vec![b'A'; 2048];
    frame::write_frame(&mut client, &oversized).await.unwrap();

    let err = timeout(Duration::from_secs(5), frame::read_frame(&mut client, 0))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, rmi_core::RmiError::ConnectionClosed));
    assert_eq!(handle.await.unwrap(), SessionOutcome::Continue);
}

#[tokio::test]
async fn idle_server_emits_heartbeats() {
    let (mut client, _handle) = start_session().await;
    authenticate(&mut client).await;

    // No command for longer than the heartbeat interval; the server
    // speaks first.
    let payload = timeout(Duration::from_secs(8), frame::read_frame(&mut client, 0))
        .await
        .expect("no heartbeat within 8s")
        .unwrap();
    assert_eq!(payload, b"HEARTBEAT");
}
