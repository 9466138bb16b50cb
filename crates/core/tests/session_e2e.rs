//! End-to-end session scenarios, driven against a real spawned local child
//! and a fake agent peer over a Unix-socket-backed data channel — see
//! `test_support::FakeAgent`.

use std::os::fd::IntoRawFd;
use std::thread;
use std::time::Duration;

use rexec_core::adapters::channel::DataChannel;
use rexec_core::adapters::process::{self, LocalEndpoints};
use rexec_core::handshake::agent_handshake;
use rexec_core::session::{SanitizeOptions, Session};
use rexec_core::wire::{MSG_DATA_EXIT_CODE, MSG_DATA_STDIN, MSG_DATA_STDOUT};
use test_support::FakeAgent;

/// Initiator role with a local `-l cat` child: an inbound DATA_STDIN frame is
/// echoed back outbound, a half-close on the inbound side propagates through
/// to the child's EOF, and the child's own exit status becomes the process
/// exit code without an EXIT_CODE frame ever crossing the channel. An
/// initiator with no local child instead waits for an EXIT_CODE frame from
/// the channel; here the CLI's `-l` path makes the child's own status
/// authoritative instead.
#[test]
fn initiator_with_local_child_echoes_and_exits_on_child_status() {
  let dir = tempfile::tempdir().unwrap();
  let dir_path = dir.path().to_path_buf();

  let server = thread::spawn(move || {
    let mut channel = DataChannel::listen_then_accept(&dir_path, 9, 100, Some(Duration::from_secs(2))).unwrap();
    let version = agent_handshake(&mut channel, false).unwrap();
    let endpoints = process::prepare(Some("cat")).unwrap();
    let session = Session::new(channel, version, endpoints, false, SanitizeOptions::default());
    session.run()
  });

  thread::sleep(Duration::from_millis(50));
  let mut agent = FakeAgent::connect(dir.path(), 9, 100);
  let version = agent.recv_hello();
  agent.send_hello(version);

  agent.send_frame(MSG_DATA_STDIN, b"hello\n");
  let (ty, payload) = agent.recv_frame();
  assert_eq!(ty, MSG_DATA_STDIN);
  assert_eq!(payload, b"hello\n");

  // Half-close: no more input for the child.
  agent.send_frame(MSG_DATA_STDIN, b"");

  let code = server.join().unwrap();
  assert_eq!(code, 0);
}

/// Service-responder role: outbound frames use DATA_STDOUT, and exactly one
/// EXIT_CODE frame carrying the child's exit status is sent once it exits.
#[test]
fn service_responder_sends_exit_code_once_child_exits() {
  let dir = tempfile::tempdir().unwrap();
  let dir_path = dir.path().to_path_buf();

  let server = thread::spawn(move || {
    let mut channel = DataChannel::listen_then_accept(&dir_path, 9, 101, Some(Duration::from_secs(2))).unwrap();
    let version = agent_handshake(&mut channel, true).unwrap();
    let endpoints = process::prepare(Some("printf hi; exit 3")).unwrap();
    let session = Session::new(channel, version, endpoints, true, SanitizeOptions::default());
    session.run()
  });

  thread::sleep(Duration::from_millis(50));
  let mut agent = FakeAgent::connect(dir.path(), 9, 101);
  agent.send_hello(3);
  let _ = agent.recv_hello();

  let mut stdout = Vec::new();
  let mut exit_status = None;
  for _ in 0..100 {
    let (ty, payload) = agent.recv_frame();
    match ty {
      MSG_DATA_STDOUT => stdout.extend_from_slice(&payload),
      MSG_DATA_EXIT_CODE => {
        exit_status = Some(i32::from_ne_bytes(payload[0..4].try_into().unwrap()));
        break;
      }
      other => panic!("unexpected frame type {other:#x}"),
    }
  }

  assert_eq!(stdout, b"hi");
  assert_eq!(exit_status, Some(3));

  let code = server.join().unwrap();
  assert_eq!(code, 3);
}

/// Non-printable bytes on an inbound frame are replaced with `_` when `-t`
/// sanitization is enabled, while preserving the allow-listed control bytes.
#[test]
fn sanitize_option_scrubs_inbound_stdout_frame() {
  let dir = tempfile::tempdir().unwrap();
  let dir_path = dir.path().to_path_buf();

  let server = thread::spawn(move || {
    let mut channel = DataChannel::listen_then_accept(&dir_path, 9, 102, Some(Duration::from_secs(2))).unwrap();
    let version = agent_handshake(&mut channel, false).unwrap();
    let endpoints = process::prepare(Some("cat")).unwrap();
    let sanitize = SanitizeOptions {
      stdout: true,
      stderr: false,
    };
    let session = Session::new(channel, version, endpoints, false, sanitize);
    session.run()
  });

  thread::sleep(Duration::from_millis(50));
  let mut agent = FakeAgent::connect(dir.path(), 9, 102);
  let version = agent.recv_hello();
  agent.send_hello(version);

  agent.send_frame(MSG_DATA_STDIN, b"a\x01b\tc\n");
  let (_, payload) = agent.recv_frame();
  assert_eq!(payload, b"a_b\tc\n");

  agent.send_frame(MSG_DATA_STDIN, b"");
  let code = server.join().unwrap();
  assert_eq!(code, 0);
}

/// Initiator role with no spawned child (the plain `client -d DOMAIN cmd`
/// invocation, §4.7: "In initiator role, the exit code is received from
/// the channel instead"). Both local halves closing on their own — an
/// immediate out_fd EOF, then an inbound half-close — must not be treated
/// as a terminal condition by itself: with no child, the session has to
/// keep waiting for EXIT_CODE.
#[test]
fn initiator_without_local_child_waits_for_exit_code_after_both_halves_close() {
  let dir = tempfile::tempdir().unwrap();
  let dir_path = dir.path().to_path_buf();

  let server = thread::spawn(move || {
    let mut channel = DataChannel::listen_then_accept(&dir_path, 9, 103, Some(Duration::from_secs(2))).unwrap();
    let version = agent_handshake(&mut channel, false).unwrap();

    // No local command: out_fd's write end is closed immediately (so the
    // read side sees EOF right away); in_fd is a pipe write end that will
    // be half-closed by an inbound zero-length frame.
    let (out_read, out_write) = nix::unistd::pipe().unwrap();
    drop(out_write);
    let (_in_read, in_write) = nix::unistd::pipe().unwrap();
    let endpoints = LocalEndpoints {
      in_fd: in_write.into_raw_fd(),
      out_fd: out_read.into_raw_fd(),
      child: None,
    };
    let session = Session::new(channel, version, endpoints, false, SanitizeOptions::default());
    session.run()
  });

  thread::sleep(Duration::from_millis(50));
  let mut agent = FakeAgent::connect(dir.path(), 9, 103);
  let version = agent.recv_hello();
  agent.send_hello(version);

  // The immediate out_fd EOF produces a zero-length half-close frame.
  let (ty, payload) = agent.recv_frame();
  assert_eq!(ty, MSG_DATA_STDIN);
  assert!(payload.is_empty());

  // Half-close the inbound side too. With no child, the session must
  // still be running — it has no exit status of its own to fall back on.
  agent.send_frame(MSG_DATA_STDIN, b"");
  thread::sleep(Duration::from_millis(200));
  assert!(!server.is_finished(), "session exited before an EXIT_CODE frame arrived");

  agent.send_frame(MSG_DATA_EXIT_CODE, &7i32.to_ne_bytes());
  let code = server.join().unwrap();
  assert_eq!(code, 7);
}
