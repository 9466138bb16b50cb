//! Byte sanitization for inbound STDOUT/STDIN/STDERR frames (`-t`/`-T`).
//!
//! Pointwise: a byte survives if it is printable ASCII (0x20-0x7E) or one of
//! TAB, LF, CR, BS, BEL; everything else becomes `_`.

const PRESERVED: [u8; 5] = [b'\t', b'\n', b'\r', 0x08, 0x07];

fn is_allowed(b: u8) -> bool {
  (0x20..=0x7E).contains(&b) || PRESERVED.contains(&b)
}

/// Replaces disallowed bytes in place with `_`.
pub fn sanitize(buf: &mut [u8]) {
  for b in buf.iter_mut() {
    if !is_allowed(*b) {
      *b = b'_';
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn preserves_whitelisted_control_bytes() {
    let mut buf = vec![b'\t', b'\n', b'\r', 0x08, 0x07];
    let expected = buf.clone();
    sanitize(&mut buf);
    assert_eq!(buf, expected);
  }

  #[test]
  fn preserves_printable_ascii() {
    let mut buf = b"Hello, world! 0x20-0x7E".to_vec();
    let expected = buf.clone();
    sanitize(&mut buf);
    assert_eq!(buf, expected);
  }

  #[test]
  fn replaces_other_control_and_high_bytes() {
    let mut buf = vec![0x00, 0x01, 0x1B, 0x7F, 0x80, 0xFF];
    sanitize(&mut buf);
    assert_eq!(buf, vec![b'_'; 6]);
  }

  proptest::proptest! {
    #[test]
    fn pointwise_over_arbitrary_bytes(input in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512)) {
      let mut buf = input.clone();
      sanitize(&mut buf);
      for (orig, got) in input.iter().zip(buf.iter()) {
        if is_allowed(*orig) {
          proptest::prop_assert_eq!(orig, got);
        } else {
          proptest::prop_assert_eq!(*got, b'_');
        }
      }
    }
  }
}
