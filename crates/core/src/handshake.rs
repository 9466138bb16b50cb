//! Agent handshake: two rounds of `HELLO` across the data channel, order
//! depending on `remote_sends_first`, agreeing a protocol version of
//! `min(peer, local)`.

use crate::adapters::channel::DataChannel;
use crate::error::ProtocolError;
use crate::wire::{MSG_HELLO, PeerInfo, QREXEC_DATA_MIN_VERSION, QREXEC_PROTOCOL_VERSION};

/// Performs the two-round handshake and returns the negotiated version.
///
/// `remote_sends_first` is true when this process is the service-responder.
/// It is an independent parameter, not derived from the target domain: who
/// opens the data channel and who speaks first across it are orthogonal
/// choices.
pub fn agent_handshake(channel: &mut DataChannel, remote_sends_first: bool) -> Result<u32, ProtocolError> {
  let mut negotiated = None;
  for round in 0u32..2 {
    let remote_turn = (round + remote_sends_first as u32) % 2 == 1;
    if remote_turn {
      let (msg_type, payload) = channel.recv_frame(PeerInfo::SIZE)?;
      if msg_type != MSG_HELLO || payload.len() != PeerInfo::SIZE {
        return Err(ProtocolError::MalformedHello {
          expected: PeerInfo::SIZE,
          got: payload.len(),
        });
      }
      let info = PeerInfo::from_bytes(payload.try_into().expect("checked length"));
      let version = info.version.min(QREXEC_PROTOCOL_VERSION);
      if version < QREXEC_DATA_MIN_VERSION {
        return Err(ProtocolError::BelowMinimumVersion {
          negotiated: version,
          minimum: QREXEC_DATA_MIN_VERSION,
        });
      }
      negotiated = Some(version);
    } else {
      let info = PeerInfo {
        version: QREXEC_PROTOCOL_VERSION,
      };
      channel
        .send_frame(MSG_HELLO, &info.to_bytes())
        .map_err(ProtocolError::Channel)?;
    }
  }
  negotiated.ok_or(ProtocolError::MalformedHello {
    expected: PeerInfo::SIZE,
    got: 0,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::channel::DataChannel;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn initiator_sends_first_then_receives() {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();
    let server = thread::spawn(move || DataChannel::listen_then_accept(&dir_path, 1, 1, Some(Duration::from_secs(2))));
    thread::sleep(Duration::from_millis(50));
    let mut client = DataChannel::connect(dir.path(), 1, 1, Some(Duration::from_secs(2))).unwrap();
    let mut server = server.join().unwrap().unwrap();

    let agent = thread::spawn(move || agent_handshake(&mut server, true));
    let version = agent_handshake(&mut client, false).unwrap();
    let agent_version = agent.join().unwrap().unwrap();
    assert_eq!(version, QREXEC_PROTOCOL_VERSION);
    assert_eq!(agent_version, QREXEC_PROTOCOL_VERSION);
  }

  #[test]
  fn below_minimum_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();
    let server = thread::spawn(move || DataChannel::listen_then_accept(&dir_path, 1, 2, Some(Duration::from_secs(2))));
    thread::sleep(Duration::from_millis(50));
    let mut client = DataChannel::connect(dir.path(), 1, 2, Some(Duration::from_secs(2))).unwrap();
    let mut server = server.join().unwrap().unwrap();

    let agent = thread::spawn(move || {
      let hdr = PeerInfo { version: 1 };
      server.send_frame(MSG_HELLO, &hdr.to_bytes()).unwrap();
      let _ = server.recv_frame(PeerInfo::SIZE);
    });
    let err = agent_handshake(&mut client, true).unwrap_err();
    agent.join().unwrap();
    assert!(matches!(err, ProtocolError::BelowMinimumVersion { .. }));
  }
}
