//! Broker session: connect to the local broker, perform the broker
//! handshake, negotiate a data-channel endpoint, and optionally send a
//! `SERVICE_CONNECT` follow-up.
//!
//! `connect` returns a typed [`ChannelError`] rather than a raw `io::Error`
//! so the CLI layer can render "broker unreachable" distinctly from a later
//! protocol error.

use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::codec;
use crate::error::{ChannelError, ProtocolError};
use crate::wire::{ExecParams, MSG_HELLO, MSG_SERVICE_CONNECT, PeerInfo, QREXEC_PROTOCOL_VERSION, ServiceParams};

/// Opens the stream socket whose path is derived from `domname`.
pub fn connect(socket_dir: &Path, domname: &str) -> Result<UnixStream, ChannelError> {
  let path = socket_dir.join(format!("qrexec.{domname}"));
  UnixStream::connect(&path).map_err(ChannelError::Io)
}

/// The broker speaks first: it sends `HELLO`, we reply with our own. Exact
/// version equality is required on this transport (unlike the data channel's
/// `min(local, remote)` negotiation).
pub fn broker_handshake(stream: &mut UnixStream) -> Result<(), ProtocolError> {
  let (msg_type, payload) = codec::recv_frame(&mut *stream, PeerInfo::SIZE)?;
  if msg_type != MSG_HELLO || payload.len() != PeerInfo::SIZE {
    return Err(ProtocolError::MalformedHello {
      expected: PeerInfo::SIZE,
      got: payload.len(),
    });
  }
  let info = PeerInfo::from_bytes(payload.try_into().expect("checked length"));
  if info.version != QREXEC_PROTOCOL_VERSION {
    return Err(ProtocolError::VersionMismatch {
      remote: info.version,
      local: QREXEC_PROTOCOL_VERSION,
    });
  }
  let reply = PeerInfo {
    version: QREXEC_PROTOCOL_VERSION,
  };
  codec::send_frame(&mut *stream, MSG_HELLO, &reply.to_bytes())?;
  Ok(())
}

/// Asks the broker to allocate a data-channel endpoint for `target_domain_id`,
/// tagging the request with `msg_type` and an opaque `payload` (the remote
/// command line, or a pre-built service identifier). Rejects any reply of a
/// different type or an unexpected length.
pub fn negotiate(
  stream: &mut UnixStream,
  target_domain_id: u32,
  msg_type: u32,
  payload: &[u8],
) -> Result<(u32, u32), ProtocolError> {
  let params = ExecParams {
    connect_domain: target_domain_id,
    connect_port: 0,
  };
  let mut body = params.to_bytes().to_vec();
  body.extend_from_slice(payload);
  codec::send_frame(&mut *stream, msg_type, &body)?;

  let (reply_type, reply_payload) = codec::recv_frame(&mut *stream, ExecParams::SIZE)?;
  if reply_type != msg_type {
    return Err(ProtocolError::UnexpectedType {
      got: reply_type,
      expected: msg_type,
    });
  }
  if reply_payload.len() != ExecParams::SIZE {
    return Err(ProtocolError::MalformedNegotiationReply {
      expected: ExecParams::SIZE,
      got: reply_payload.len(),
    });
  }
  let reply = ExecParams::from_bytes(reply_payload.try_into().expect("checked length"));
  Ok((reply.connect_domain, reply.connect_port))
}

/// Tells the broker holding a pending service call to connect it to the
/// data-channel endpoint already allocated at `(connect_domain, connect_port)`.
pub fn send_service_connect(
  stream: &mut UnixStream,
  ident: ServiceParams,
  connect_domain: u32,
  connect_port: u32,
) -> Result<(), ProtocolError> {
  let params = ExecParams {
    connect_domain,
    connect_port,
  };
  let mut body = params.to_bytes().to_vec();
  body.extend_from_slice(&ident.to_bytes());
  codec::send_frame(&mut *stream, MSG_SERVICE_CONNECT, &body)
}

/// Blocks until the broker socket reports EOF (`-W`).
pub fn wait_for_eof(stream: &mut UnixStream) -> std::io::Result<()> {
  use std::io::Read;
  let mut buf = [0u8; 64];
  loop {
    match stream.read(&mut buf) {
      Ok(0) => return Ok(()),
      Ok(_) => continue,
      Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
      Err(e) => return Err(e),
    }
  }
}
