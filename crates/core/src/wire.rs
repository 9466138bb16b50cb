//! Wire-format constants and structs shared by the codec, broker session,
//! and agent handshake.
//!
//! The daemon/agent side of this protocol is an external collaborator; the
//! exact integer values below only need to be internally consistent between
//! this client's own negotiate/handshake calls, since the real broker and
//! the wire constants it expects are out of scope for this workspace (see
//! DESIGN.md).

/// Handshake frame carrying a `PeerInfo` (protocol version).
pub const MSG_HELLO: u32 = 0x70;
/// Ask the broker to run `REMOTE_CMDLINE` in the target domain and open a
/// data channel for it.
pub const MSG_EXEC_CMDLINE: u32 = 0x71;
/// Ask the broker to run `REMOTE_CMDLINE` without opening a data channel.
pub const MSG_JUST_EXEC: u32 = 0x72;
/// Connect to a data channel already allocated for a pending service call.
pub const MSG_SERVICE_CONNECT: u32 = 0x73;
/// Bytes read from the local output descriptor, carried toward the peer.
pub const MSG_DATA_STDIN: u32 = 0x74;
/// Bytes produced by the service-responder's local command.
pub const MSG_DATA_STDOUT: u32 = 0x75;
/// Bytes written to the service-responder's stderr.
pub const MSG_DATA_STDERR: u32 = 0x76;
/// Terminal frame carrying the process exit status.
pub const MSG_DATA_EXIT_CODE: u32 = 0x77;

/// Current protocol version spoken by this client.
pub const QREXEC_PROTOCOL_VERSION: u32 = 3;
/// Lowest protocol version this client will agree to run the data channel at.
pub const QREXEC_DATA_MIN_VERSION: u32 = 2;

/// Number of bytes in a fixed-width service identifier (`-c REQID,...`).
pub const SERVICE_IDENT_LEN: usize = 32;

/// Upper bound on a `REMOTE_CMDLINE` argument, matching the broker's own limit.
pub const MAX_QREXEC_CMD_LEN: usize = 131072;

/// Maximum DATA frame payload for a given negotiated protocol version.
///
/// Older peers only tolerate a conservative 4 KiB chunk; protocol version 3
/// and above accept up to 64 KiB.
pub fn max_chunk(version: u32) -> usize {
  if version >= 3 { 65536 } else { 4096 }
}

/// Fixed-size frame header: `{type, length}`, native byte order (same host).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
  pub msg_type: u32,
  pub len: u32,
}

impl MsgHeader {
  pub const SIZE: usize = 8;

  pub fn new(msg_type: u32, len: u32) -> Self {
    Self { msg_type, len }
  }

  pub fn to_bytes(self) -> [u8; Self::SIZE] {
    let mut buf = [0u8; Self::SIZE];
    buf[0..4].copy_from_slice(&self.msg_type.to_ne_bytes());
    buf[4..8].copy_from_slice(&self.len.to_ne_bytes());
    buf
  }

  pub fn from_bytes(buf: [u8; Self::SIZE]) -> Self {
    let msg_type = u32::from_ne_bytes(buf[0..4].try_into().expect("4 bytes"));
    let len = u32::from_ne_bytes(buf[4..8].try_into().expect("4 bytes"));
    Self { msg_type, len }
  }
}

/// Payload of a negotiation request/reply: the data-channel endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecParams {
  pub connect_domain: u32,
  pub connect_port: u32,
}

impl ExecParams {
  pub const SIZE: usize = 8;

  pub fn to_bytes(self) -> [u8; Self::SIZE] {
    let mut buf = [0u8; Self::SIZE];
    buf[0..4].copy_from_slice(&self.connect_domain.to_ne_bytes());
    buf[4..8].copy_from_slice(&self.connect_port.to_ne_bytes());
    buf
  }

  pub fn from_bytes(buf: [u8; Self::SIZE]) -> Self {
    Self {
      connect_domain: u32::from_ne_bytes(buf[0..4].try_into().expect("4 bytes")),
      connect_port: u32::from_ne_bytes(buf[4..8].try_into().expect("4 bytes")),
    }
  }
}

/// HELLO payload: the speaker's protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
  pub version: u32,
}

impl PeerInfo {
  pub const SIZE: usize = 4;

  pub fn to_bytes(self) -> [u8; Self::SIZE] {
    self.version.to_ne_bytes()
  }

  pub fn from_bytes(buf: [u8; Self::SIZE]) -> Self {
    Self {
      version: u32::from_ne_bytes(buf),
    }
  }
}

/// Fixed-width, NUL-padded service identifier carried by `SERVICE_CONNECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceParams {
  pub ident: [u8; SERVICE_IDENT_LEN],
}

impl ServiceParams {
  pub const SIZE: usize = SERVICE_IDENT_LEN;

  /// Builds a zero-padded identifier. Returns `None` if `ident` (plus its
  /// terminating NUL) would not fit, rather than silently truncating it.
  pub fn new(ident: &str) -> Option<Self> {
    if ident.len() >= SERVICE_IDENT_LEN {
      return None;
    }
    let mut buf = [0u8; SERVICE_IDENT_LEN];
    buf[..ident.len()].copy_from_slice(ident.as_bytes());
    Some(Self { ident: buf })
  }

  pub fn to_bytes(self) -> [u8; Self::SIZE] {
    self.ident
  }

  pub fn from_bytes(buf: [u8; Self::SIZE]) -> Self {
    Self { ident: buf }
  }
}
