//! Non-blocking writer for the local input descriptor, with an unbounded
//! overflow queue for bytes that arrived faster than the descriptor could
//! absorb them.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::os::fd::RawFd;

/// Outcome of a write attempt against the local input descriptor.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
  /// Everything (queued overflow plus new bytes) was written.
  Ok,
  /// Some bytes could not be written without blocking; they were appended
  /// to the overflow queue. The caller should stop feeding new DATA frames
  /// until the queue drains.
  Buffered,
}

/// Buffered, non-blocking writer wrapping a raw file descriptor that has
/// already been put in non-blocking mode.
pub struct BufferedWriter {
  fd: RawFd,
  overflow: VecDeque<u8>,
}

impl BufferedWriter {
  pub fn new(fd: RawFd) -> Self {
    Self {
      fd,
      overflow: VecDeque::new(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.overflow.is_empty()
  }

  pub fn len(&self) -> usize {
    self.overflow.len()
  }

  /// Attempts to write queued overflow first, then `bytes`. On partial
  /// progress, the remainder is appended to the overflow queue.
  pub fn write_stdin(&mut self, bytes: &[u8]) -> io::Result<WriteOutcome> {
    if !self.overflow.is_empty() {
      self.drain_overflow()?;
      if !self.overflow.is_empty() {
        self.overflow.extend(bytes);
        return Ok(WriteOutcome::Buffered);
      }
    }
    self.write_new(bytes)
  }

  /// Drains the overflow queue without accepting new input.
  pub fn flush(&mut self) -> io::Result<WriteOutcome> {
    self.drain_overflow()?;
    if self.overflow.is_empty() {
      Ok(WriteOutcome::Ok)
    } else {
      Ok(WriteOutcome::Buffered)
    }
  }

  fn write_new(&mut self, bytes: &[u8]) -> io::Result<WriteOutcome> {
    let mut written = 0usize;
    while written < bytes.len() {
      match raw_write(self.fd, &bytes[written..]) {
        Ok(0) => break,
        Ok(n) => written += n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
    if written < bytes.len() {
      self.overflow.extend(&bytes[written..]);
      Ok(WriteOutcome::Buffered)
    } else {
      Ok(WriteOutcome::Ok)
    }
  }

  fn drain_overflow(&mut self) -> io::Result<()> {
    while !self.overflow.is_empty() {
      let contiguous = self.overflow.make_contiguous();
      match raw_write(self.fd, contiguous) {
        Ok(0) => break,
        Ok(n) => {
          self.overflow.drain(0..n);
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
    Ok(())
  }
}

fn raw_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
  struct Fd(RawFd);
  impl Write for Fd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      let n = unsafe { libc::write(self.0, buf.as_ptr() as *const _, buf.len()) };
      if n < 0 {
        Err(io::Error::last_os_error())
      } else {
        Ok(n as usize)
      }
    }
    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }
  Fd(fd).write(buf)
}

#[cfg(test)]
mod tests {
  use super::*;
  use nix::fcntl::{FcntlArg, OFlag, fcntl};
  use nix::unistd::pipe;
  use std::os::fd::IntoRawFd;

  fn make_pipe_nonblocking_write_end() -> (RawFd, RawFd) {
    let (r, w) = pipe().unwrap();
    let w_fd = w.into_raw_fd();
    let r_fd = r.into_raw_fd();
    fcntl(w_fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).unwrap();
    (r_fd, w_fd)
  }

  #[test]
  fn writes_small_payload_immediately() {
    let (r, w) = make_pipe_nonblocking_write_end();
    let mut writer = BufferedWriter::new(w);
    let outcome = writer.write_stdin(b"hello").unwrap();
    assert_eq!(outcome, WriteOutcome::Ok);
    assert!(writer.is_empty());

    let mut buf = [0u8; 16];
    let n = unsafe { libc::read(r, buf.as_mut_ptr() as *mut _, buf.len()) };
    assert_eq!(&buf[..n as usize], b"hello");
    unsafe {
      libc::close(r);
      libc::close(w);
    }
  }

  #[test]
  fn buffers_when_pipe_is_full() {
    let (r, w) = make_pipe_nonblocking_write_end();
    let mut writer = BufferedWriter::new(w);
    let big = vec![b'x'; 1024 * 1024];
    let outcome = writer.write_stdin(&big).unwrap();
    assert_eq!(outcome, WriteOutcome::Buffered);
    assert!(!writer.is_empty());
    unsafe {
      libc::close(r);
      libc::close(w);
    }
  }
}
