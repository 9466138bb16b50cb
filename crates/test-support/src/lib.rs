//! Test-only helpers: a fake broker and a fake agent peer over real Unix
//! sockets, for exercising end-to-end session scenarios without a real
//! broker or vchan transport.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rexec_core::codec;
use rexec_core::wire::{ExecParams, PeerInfo, QREXEC_PROTOCOL_VERSION};

/// A fake broker: accepts one connection, sends HELLO, expects HELLO back,
/// then expects and answers exactly one negotiation request.
pub struct FakeBroker {
  socket_path: PathBuf,
}

impl FakeBroker {
  pub fn bind(socket_dir: &Path, domname: &str) -> Self {
    let socket_path = socket_dir.join(format!("qrexec.{domname}"));
    Self { socket_path }
  }

  /// Runs the broker handshake plus one negotiation round on a background
  /// thread, replying with `(data_domain, data_port)`. Returns a handle that
  /// yields the request body once the exchange completes.
  pub fn serve_one_negotiation(self, expect_type: u32, data_domain: u32, data_port: u32) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
      let listener = UnixListener::bind(&self.socket_path).expect("bind broker socket");
      let (mut stream, _) = listener.accept().expect("accept broker client");

      let hello = PeerInfo {
        version: QREXEC_PROTOCOL_VERSION,
      };
      codec::send_frame(&mut stream, rexec_core::wire::MSG_HELLO, &hello.to_bytes()).expect("send broker hello");
      let (ty, _) = codec::recv_frame(&mut stream, PeerInfo::SIZE).expect("recv client hello");
      assert_eq!(ty, rexec_core::wire::MSG_HELLO);

      let (ty, body) = codec::recv_frame(&mut stream, 1 << 20).expect("recv negotiation request");
      assert_eq!(ty, expect_type);

      let reply = ExecParams {
        connect_domain: data_domain,
        connect_port: data_port,
      };
      codec::send_frame(&mut stream, expect_type, &reply.to_bytes()).expect("send negotiation reply");
      body
    })
  }

  /// Serves the broker handshake, a negotiation, and keeps the connection
  /// open until dropped (to exercise `-W`'s EOF wait).
  pub fn serve_and_hold(self, expect_type: u32, data_domain: u32, data_port: u32, hold: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
      let listener = UnixListener::bind(&self.socket_path).expect("bind broker socket");
      let (mut stream, _) = listener.accept().expect("accept broker client");
      let hello = PeerInfo {
        version: QREXEC_PROTOCOL_VERSION,
      };
      codec::send_frame(&mut stream, rexec_core::wire::MSG_HELLO, &hello.to_bytes()).expect("send broker hello");
      let (_, _) = codec::recv_frame(&mut stream, PeerInfo::SIZE).expect("recv client hello");
      let (ty, _) = codec::recv_frame(&mut stream, 1 << 20).expect("recv negotiation request");
      assert_eq!(ty, expect_type);
      let reply = ExecParams {
        connect_domain: data_domain,
        connect_port: data_port,
      };
      codec::send_frame(&mut stream, expect_type, &reply.to_bytes()).expect("send negotiation reply");
      thread::sleep(hold);
    })
  }

  /// Accepts one connection and expects exactly one `SERVICE_CONNECT`
  /// frame — no broker HELLO handshake, matching the service-responder
  /// relay's source-domain socket, which skips it. Returns the frame's
  /// payload.
  pub fn serve_service_connect(self, expect_type: u32) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
      let listener = UnixListener::bind(&self.socket_path).expect("bind broker socket");
      let (mut stream, _) = listener.accept().expect("accept broker client");
      let (ty, body) = codec::recv_frame(&mut stream, 1 << 20).expect("recv service connect");
      assert_eq!(ty, expect_type);
      body
    })
  }
}

/// A fake agent: the peer at the other end of a data channel, driven
/// manually frame-by-frame from test code rather than through `Session`.
pub struct FakeAgent {
  pub stream: UnixStream,
}

impl FakeAgent {
  /// Connects to a data-channel socket a test has pre-bound with
  /// `DataChannel::listen_then_accept`, performing only the raw socket
  /// connect (the agent handshake itself is driven explicitly by the test).
  pub fn connect(channel_dir: &Path, domain_id: u32, port: u32) -> Self {
    let path = channel_dir.join(format!("qrexec-data.{domain_id}.{port}"));
    for _ in 0..200 {
      if let Ok(stream) = UnixStream::connect(&path) {
        return Self { stream };
      }
      thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out connecting to fake data channel at {path:?}");
  }

  pub fn send_hello(&mut self, version: u32) {
    let info = PeerInfo { version };
    codec::send_frame(&mut self.stream, rexec_core::wire::MSG_HELLO, &info.to_bytes()).expect("send hello");
  }

  pub fn recv_hello(&mut self) -> u32 {
    let (ty, payload) = codec::recv_frame(&mut self.stream, PeerInfo::SIZE).expect("recv hello");
    assert_eq!(ty, rexec_core::wire::MSG_HELLO);
    PeerInfo::from_bytes(payload.try_into().expect("4 bytes")).version
  }

  pub fn send_frame(&mut self, msg_type: u32, payload: &[u8]) {
    codec::send_frame(&mut self.stream, msg_type, payload).expect("send frame");
  }

  pub fn recv_frame(&mut self) -> (u32, Vec<u8>) {
    codec::recv_frame(&mut self.stream, 1 << 20).expect("recv frame")
  }
}
