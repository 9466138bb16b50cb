//! Small raw-fd helpers shared by the data channel, the buffered writer, and
//! the event loop: non-blocking mode toggling, best-effort shutdown, and a
//! single-fd `poll` used to wait out a spurious `EWOULDBLOCK` after a
//! readiness notification.

use std::io;
use std::os::fd::{BorrowedFd, RawFd};

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout};

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
  let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
  let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
  fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
  Ok(())
}

pub fn set_blocking(fd: RawFd) -> io::Result<()> {
  let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
  let flags = OFlag::from_bits_truncate(flags) & !OFlag::O_NONBLOCK;
  fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
  Ok(())
}

/// `shutdown(2)` on `fd`, ignoring `ENOTSOCK` (the fd may be a pipe or a tty
/// rather than a socket, which is not an error here).
pub fn shutdown_ignore_enotsock(fd: RawFd, how: libc::c_int) {
  let rc = unsafe { libc::shutdown(fd, how) };
  if rc != 0 {
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ENOTSOCK) {
      tracing::debug!(event = "shutdown_failed", fd, error = %err, "shutdown() failed");
    }
  }
}

pub fn close_fd(fd: RawFd) {
  unsafe {
    libc::close(fd);
  }
}

pub fn raw_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
  loop {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
    if n >= 0 {
      return Ok(n as usize);
    }
    let err = io::Error::last_os_error();
    match err.kind() {
      io::ErrorKind::Interrupted => continue,
      io::ErrorKind::WouldBlock => {
        let _ = poll_one(fd, PollFlags::POLLIN, PollTimeout::NONE);
        continue;
      }
      _ => return Err(err),
    }
  }
}

pub fn raw_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
  loop {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const _, buf.len()) };
    if n >= 0 {
      return Ok(n as usize);
    }
    let err = io::Error::last_os_error();
    match err.kind() {
      io::ErrorKind::Interrupted => continue,
      io::ErrorKind::WouldBlock => {
        let _ = poll_one(fd, PollFlags::POLLOUT, PollTimeout::NONE);
        continue;
      }
      _ => return Err(err),
    }
  }
}

pub fn poll_one(fd: RawFd, flags: PollFlags, timeout: PollTimeout) -> nix::Result<PollFlags> {
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
