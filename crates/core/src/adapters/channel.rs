//! The data channel: a bounded, framed, bidirectional byte pipe identified
//! by `(domain_id, port)`.
//!
//! The real transport (vchan, backed by a Xen/hypervisor ring buffer) is an
//! external collaborator out of scope for this workspace: this module
//! stands in with a Unix-domain-socket-backed implementation of the same
//! contract — framed, bounded, pollable, bidirectional — addressed the same
//! way the broker addresses its own socket, under a configurable channel
//! directory rather than a hypervisor ring. See DESIGN.md for the
//! open-question resolution.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::poll::{PollFd, PollFlags, PollTimeout};

use crate::codec;
use crate::error::{ChannelError, ProtocolError};

/// Nominal per-channel buffer capacity, mirroring the real transport's fixed
/// `VCHAN_BUFFER_SIZE` (64 KiB) rather than a kernel-queried value, since the
/// real transport's flow control is opaque to this client.
pub const CHANNEL_BUFFER_SIZE: usize = 65536;

fn channel_socket_path(channel_dir: &Path, domain_id: u32, port: u32) -> PathBuf {
  channel_dir.join(format!("qrexec-data.{domain_id}.{port}"))
}

fn poll_one(fd: RawFd, flags: PollFlags, timeout: PollTimeout) -> nix::Result<PollFlags> {
  use std::os::fd::BorrowedFd;
  let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
  let mut fds = [PollFd::new(borrowed, flags)];
  loop {
    match nix::poll::poll(&mut fds, timeout) {
      Ok(_) => return Ok(fds[0].revents().unwrap_or(PollFlags::empty())),
      Err(nix::errno::Errno::EINTR) => continue,
      Err(e) => return Err(e),
    }
  }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
  deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// A bidirectional, framed, bounded, pollable data channel.
pub struct DataChannel {
  stream: UnixStream,
  open: bool,
}

impl DataChannel {
  /// Server role: listen at the path derived from `(domain_id, port)` and
  /// accept exactly one peer within `timeout` (`None` disables the bound).
  pub fn listen_then_accept(
    channel_dir: &Path,
    domain_id: u32,
    port: u32,
    timeout: Option<Duration>,
  ) -> Result<Self, ChannelError> {
    let path = channel_socket_path(channel_dir, domain_id, port);
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    listener.set_nonblocking(true)?;
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
      match listener.accept() {
        Ok((stream, _)) => {
          stream.set_nonblocking(true)?;
          return Ok(Self { stream, open: true });
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          let budget = match remaining(deadline) {
            Some(d) if d.is_zero() => return Err(ChannelError::Timeout),
            Some(d) => PollTimeout::try_from(d.as_millis() as u32).unwrap_or(PollTimeout::MAX),
            None => PollTimeout::NONE,
          };
          let revents = poll_one(listener.as_raw_fd(), PollFlags::POLLIN, budget)
            .map_err(|e| ChannelError::Io(io::Error::from(e)))?;
          if revents.is_empty() && timeout.is_some() {
            return Err(ChannelError::Timeout);
          }
        }
        Err(e) => return Err(ChannelError::Io(e)),
      }
    }
  }

  /// Client role: connect to the peer's pre-existing listening endpoint,
  /// bounded by `timeout`.
  pub fn connect(
    channel_dir: &Path,
    domain_id: u32,
    port: u32,
    timeout: Option<Duration>,
  ) -> Result<Self, ChannelError> {
    let path = channel_socket_path(channel_dir, domain_id, port);
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
      match UnixStream::connect(&path) {
        Ok(stream) => {
          stream.set_nonblocking(true)?;
          return Ok(Self { stream, open: true });
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
          if let Some(d) = remaining(deadline) {
            if d.is_zero() {
              return Err(ChannelError::Timeout);
            }
          }
          std::thread::sleep(Duration::from_millis(20));
        }
        Err(e) => return Err(ChannelError::Io(e)),
      }
    }
  }

  pub fn poll_fd(&self) -> RawFd {
    self.stream.as_raw_fd()
  }

  /// Free space in the channel for a future write, header included.
  pub fn buffer_space(&self) -> usize {
    if self.open { CHANNEL_BUFFER_SIZE } else { 0 }
  }

  pub fn is_open(&self) -> bool {
    self.open
  }

  pub fn close(&mut self) {
    if self.open {
      let _ = self.stream.shutdown(std::net::Shutdown::Both);
      self.open = false;
    }
  }

  /// Advances the channel's internal state after a readiness notification.
  /// For this socket-backed implementation there is no separate control
  /// channel to drain: this peeks non-destructively to detect a
  /// peer-closed condition promptly.
  pub fn wait(&mut self) {
    let mut probe = [0u8; 1];
    match self.stream.peek(&mut probe) {
      Ok(0) => self.open = false,
      Ok(_) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
      Err(_) => self.open = false,
    }
  }

  /// `true` once a full frame (or more) is already readable without
  /// blocking.
  pub fn data_ready(&mut self) -> bool {
    let mut probe = [0u8; 1];
    match self.stream.peek(&mut probe) {
      Ok(n) => n > 0,
      Err(_) => false,
    }
  }

  pub fn send_frame(&mut self, msg_type: u32, payload: &[u8]) -> Result<(), ChannelError> {
    let mut writer = NonBlockingIo(&mut self.stream);
    codec::send_frame(&mut writer, msg_type, payload).map_err(|e| match e {
      ProtocolError::Io(io_err) => ChannelError::Io(io_err),
      ProtocolError::Channel(c) => c,
      other => ChannelError::Io(io::Error::other(other.to_string())),
    })
  }

  pub fn recv_frame(&mut self, max_payload: usize) -> Result<(u32, Vec<u8>), ProtocolError> {
    let mut reader = NonBlockingIo(&mut self.stream);
    codec::recv_frame(&mut reader, max_payload)
  }
}

/// Adapts a non-blocking stream to blocking `Read`/`Write` by polling on
/// `WouldBlock`, matching vchan's own "block until N bytes available"
/// exactly-N semantics.
struct NonBlockingIo<'a>(&'a mut UnixStream);

impl Read for NonBlockingIo<'_> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    loop {
      match self.0.read(buf) {
        Ok(n) => return Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          poll_one(self.0.as_raw_fd(), PollFlags::POLLIN, PollTimeout::NONE)
            .map_err(io::Error::from)?;
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
  }
}

impl Write for NonBlockingIo<'_> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    loop {
      match self.0.write(buf) {
        Ok(n) => return Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          poll_one(self.0.as_raw_fd(), PollFlags::POLLOUT, PollTimeout::NONE)
            .map_err(io::Error::from)?;
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
  }

  fn flush(&mut self) -> io::Result<()> {
    self.0.flush()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  #[test]
  fn client_times_out_when_nobody_listens() {
    let dir = tempfile::tempdir().unwrap();
    let err = DataChannel::connect(dir.path(), 5, 42, Some(Duration::from_millis(200)))
      .expect_err("should time out");
    assert!(matches!(err, ChannelError::Timeout));
  }

  #[test]
  fn server_accepts_connecting_client() {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();
    let server = thread::spawn(move || {
      DataChannel::listen_then_accept(&dir_path, 5, 42, Some(Duration::from_secs(2)))
    });
    // Give the listener a moment to bind before the client dials in.
    thread::sleep(Duration::from_millis(50));
    let mut client = DataChannel::connect(dir.path(), 5, 42, Some(Duration::from_secs(2))).unwrap();
    let mut server = server.join().unwrap().unwrap();

    client.send_frame(0x74, b"ping").unwrap();
    let (ty, payload) = server.recv_frame(4096).unwrap();
    assert_eq!(ty, 0x74);
    assert_eq!(payload, b"ping");
  }

  #[test]
  fn wait_detects_peer_close() {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();
    let server = thread::spawn(move || {
      DataChannel::listen_then_accept(&dir_path, 5, 43, Some(Duration::from_secs(2)))
    });
    thread::sleep(Duration::from_millis(50));
    let client = DataChannel::connect(dir.path(), 5, 43, Some(Duration::from_secs(2))).unwrap();
    let mut server = server.join().unwrap().unwrap();
    drop(client);
    thread::sleep(Duration::from_millis(50));
    server.wait();
    assert!(!server.is_open());
  }
}
