//! Framed codec: `send_frame`/`recv_frame` over anything that looks like a
//! byte stream (the broker's `UnixStream` or a data channel). Reads are
//! "read exactly N" — a short read is an error, not a partial frame.

use std::io::{Read, Write};

use crate::error::ProtocolError;
use crate::wire::MsgHeader;

/// Writes one frame: header followed by `payload`.
pub fn send_frame<W: Write>(mut w: W, msg_type: u32, payload: &[u8]) -> Result<(), ProtocolError> {
  let hdr = MsgHeader::new(msg_type, payload.len() as u32);
  w.write_all(&hdr.to_bytes())?;
  w.write_all(payload)?;
  Ok(())
}

/// Reads one frame, rejecting a `length` that exceeds `max_payload` before
/// allocating a buffer for it.
pub fn recv_frame<R: Read>(mut r: R, max_payload: usize) -> Result<(u32, Vec<u8>), ProtocolError> {
  let mut hdr_buf = [0u8; MsgHeader::SIZE];
  r.read_exact(&mut hdr_buf)?;
  let hdr = MsgHeader::from_bytes(hdr_buf);
  let len = hdr.len as usize;
  if len > max_payload {
    return Err(ProtocolError::OversizedPayload {
      len,
      max: max_payload,
    });
  }
  let mut payload = vec![0u8; len];
  r.read_exact(&mut payload)?;
  Ok((hdr.msg_type, payload))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn roundtrip() {
    let mut buf = Vec::new();
    send_frame(&mut buf, 0x74, b"hello").unwrap();
    let (ty, payload) = recv_frame(Cursor::new(buf), 4096).unwrap();
    assert_eq!(ty, 0x74);
    assert_eq!(payload, b"hello");
  }

  #[test]
  fn empty_payload_is_half_close_indicator() {
    let mut buf = Vec::new();
    send_frame(&mut buf, 0x74, b"").unwrap();
    let (_, payload) = recv_frame(Cursor::new(buf), 4096).unwrap();
    assert!(payload.is_empty());
  }

  #[test]
  fn rejects_oversized_length_before_reading_payload() {
    let mut buf = Vec::new();
    send_frame(&mut buf, 0x74, &vec![0u8; 100]).unwrap();
    let err = recv_frame(Cursor::new(buf), 10).unwrap_err();
    assert!(matches!(err, ProtocolError::OversizedPayload { len: 100, max: 10 }));
  }

  #[test]
  fn short_read_is_an_error_not_a_short_frame() {
    let mut buf = Vec::new();
    send_frame(&mut buf, 0x74, b"hello").unwrap();
    buf.truncate(buf.len() - 1);
    let err = recv_frame(Cursor::new(buf), 4096).unwrap_err();
    assert!(matches!(err, ProtocolError::Io(_)));
  }

  proptest::proptest! {
    #[test]
    fn roundtrip_arbitrary_payload(ty in proptest::prelude::any::<u32>(), payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4096)) {
      let mut buf = Vec::new();
      send_frame(&mut buf, ty, &payload).unwrap();
      let (got_ty, got_payload) = recv_frame(Cursor::new(buf), 65536).unwrap();
      proptest::prop_assert_eq!(got_ty, ty);
      proptest::prop_assert_eq!(got_payload, payload);
    }
  }
}
