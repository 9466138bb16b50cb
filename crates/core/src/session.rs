//! Event loop and termination protocol: multiplexes the data channel against
//! the two local descriptors under flow control, and decides when to send an
//! exit code, when to close each half, and what status the process itself
//! returns.
//!
//! Readiness multiplexing uses `nix::poll::poll` in place of `pselect` plus
//! signal masking: the reaper thread's self-pipe is one more `PollFd`
//! alongside the channel wait-fd, `out_fd`, and `in_fd`, so "interrupted wait
//! while a child exists" never needs special-casing — the self-pipe write
//! *is* the wakeup.

use std::io;
use std::os::fd::{BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout};

use crate::adapters::channel::DataChannel;
use crate::adapters::process::{self, ChildHandle, LocalEndpoints};
use crate::fdutil;
use crate::sanitize::sanitize;
use crate::wire::{MSG_DATA_EXIT_CODE, MSG_DATA_STDERR, MSG_DATA_STDIN, MSG_DATA_STDOUT, MsgHeader, max_chunk};
use crate::writer::{BufferedWriter, WriteOutcome};

const NOMINAL_TIMEOUT_MS: u32 = 10_000;

/// Sanitization options for inbound frames (CLI `-t`/`-T`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SanitizeOptions {
  pub stdout: bool,
  pub stderr: bool,
}

enum FrameAction {
  Continue,
  Buffered,
  Exit(i32),
}

/// Owns the data channel and the two local descriptors, and drives the
/// event loop to completion, returning the process exit code.
pub struct Session {
  channel: DataChannel,
  version: u32,
  in_fd: Option<RawFd>,
  out_fd: Option<RawFd>,
  shared_fd: bool,
  writer: BufferedWriter,
  child: Option<ChildHandle>,
  is_service: bool,
  sanitize: SanitizeOptions,
}

impl Session {
  pub fn new(channel: DataChannel, version: u32, endpoints: LocalEndpoints, is_service: bool, sanitize: SanitizeOptions) -> Self {
    let LocalEndpoints { in_fd, out_fd, child } = endpoints;
    fdutil::set_nonblocking(in_fd).ok();
    Self {
      channel,
      version,
      in_fd: Some(in_fd),
      out_fd: Some(out_fd),
      shared_fd: in_fd == out_fd,
      writer: BufferedWriter::new(in_fd),
      child,
      is_service,
      sanitize,
    }
  }

  /// Runs the event loop until a terminal condition is reached, returning
  /// the process exit code.
  pub fn run(mut self) -> i32 {
    loop {
      if self.out_fd.is_none()
        && let Some(code) = self.check_child_status()
      {
        return code;
      }

      match self.wait_for_readiness() {
        Readiness::Timeout => {
          if !self.channel.is_open() {
            eprintln!("remote disconnected without a proper signalling");
            return 1;
          }
        }
        Readiness::Error(e) => {
          eprintln!("poll: {e}");
          return 1;
        }
        Readiness::Ready {
          channel_readable,
          in_writable,
          out_readable,
        } => {
          if channel_readable {
            self.channel.wait();
          }
          if in_writable {
            match self.writer.flush() {
              Ok(_) => {}
              Err(e) => {
                eprintln!("write stdin: {e}");
                self.close_in_fd();
              }
            }
          }
          loop {
            if !self.channel.data_ready() {
              break;
            }
            match self.handle_inbound_frame() {
              FrameAction::Continue => continue,
              FrameAction::Buffered => break,
              FrameAction::Exit(code) => return code,
            }
          }
          if out_readable
            && let Some(code) = self.service_outbound_read()
          {
            return code;
          }
        }
      }
    }
  }

  fn check_child_status(&mut self) -> Option<i32> {
    let status = self.child.as_ref()?.poll_exit()?;
    Some(self.finish_with_child_status(status))
  }

  fn finish_with_child_status(&mut self, status: i32) -> i32 {
    if self.is_service {
      let _ = self.channel.send_frame(MSG_DATA_EXIT_CODE, &status.to_ne_bytes());
    }
    self.close_in_fd();
    self.close_out_fd();
    process::reap_remaining_children();
    status
  }

  fn wait_for_readiness(&mut self) -> Readiness {
    let channel_fd = self.channel.poll_fd();
    let watch_out = self.out_fd.filter(|_| self.channel.buffer_space() > MsgHeader::SIZE);
    let watch_in = self.in_fd.filter(|_| !self.writer.is_empty());
    let watch_child = self.child.as_ref().map(|c| c.wake_fd());

    let channel_borrowed = unsafe { BorrowedFd::borrow_raw(channel_fd) };
    let out_borrowed = watch_out.map(|fd| unsafe { BorrowedFd::borrow_raw(fd) });
    let in_borrowed = watch_in.map(|fd| unsafe { BorrowedFd::borrow_raw(fd) });
    let child_borrowed = watch_child.map(|fd| unsafe { BorrowedFd::borrow_raw(fd) });

    let mut fds = vec![PollFd::new(channel_borrowed, PollFlags::POLLIN)];
    let out_idx = out_borrowed.map(|b| {
      fds.push(PollFd::new(b, PollFlags::POLLIN));
      fds.len() - 1
    });
    let in_idx = in_borrowed.map(|b| {
      fds.push(PollFd::new(b, PollFlags::POLLOUT));
      fds.len() - 1
    });
    if let Some(b) = child_borrowed {
      fds.push(PollFd::new(b, PollFlags::POLLIN));
    }

    // Drain-before-rearm: if the local input side can't accept more right
    // now but the channel already has pending data, don't block at all.
    let drain_now = (self.in_fd.is_none() || self.writer.is_empty()) && self.channel.data_ready();
    let timeout = if drain_now {
      PollTimeout::try_from(0u32).unwrap_or(PollTimeout::NONE)
    } else {
      PollTimeout::try_from(NOMINAL_TIMEOUT_MS).unwrap_or(PollTimeout::MAX)
    };

    let ready = loop {
      match nix::poll::poll(&mut fds, timeout) {
        Ok(n) => break n,
        Err(Errno::EINTR) => continue,
        Err(e) => return Readiness::Error(io::Error::from(e)),
      }
    };

    if ready == 0 {
      return Readiness::Timeout;
    }

    let channel_revents = fds[0].revents().unwrap_or(PollFlags::empty());
    let in_writable = in_idx
      .map(|idx| fds[idx].revents().unwrap_or(PollFlags::empty()).contains(PollFlags::POLLOUT))
      .unwrap_or(false);
    let out_readable = out_idx
      .map(|idx| fds[idx].revents().unwrap_or(PollFlags::empty()).intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
      .unwrap_or(false);

    Readiness::Ready {
      channel_readable: channel_revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP),
      in_writable,
      out_readable,
    }
  }

  fn handle_inbound_frame(&mut self) -> FrameAction {
    let max = max_chunk(self.version);
    let (msg_type, mut payload) = match self.channel.recv_frame(max) {
      Ok(v) => v,
      Err(e) => {
        eprintln!("read vchan: {e}");
        return FrameAction::Exit(1);
      }
    };
    match msg_type {
      MSG_DATA_STDIN | MSG_DATA_STDOUT => {
        if self.in_fd.is_none() {
          return FrameAction::Continue;
        }
        if self.sanitize.stdout {
          sanitize(&mut payload);
        }
        if payload.is_empty() {
          self.close_in_fd();
          return FrameAction::Continue;
        }
        match self.writer.write_stdin(&payload) {
          Ok(WriteOutcome::Ok) => FrameAction::Continue,
          Ok(WriteOutcome::Buffered) => FrameAction::Buffered,
          Err(e) if e.raw_os_error() == Some(libc::EPIPE) => {
            self.close_in_fd();
            FrameAction::Continue
          }
          Err(e) => {
            eprintln!("write local stdout: {e}");
            FrameAction::Exit(1)
          }
        }
      }
      MSG_DATA_STDERR => {
        if self.sanitize.stderr {
          sanitize(&mut payload);
        }
        let _ = write_all_best_effort(2, &payload);
        FrameAction::Continue
      }
      MSG_DATA_EXIT_CODE => {
        self.channel.close();
        let status = if payload.len() < 4 {
          255
        } else {
          i32::from_ne_bytes(payload[0..4].try_into().expect("checked length"))
        };
        let _ = self.writer.flush();
        self.close_in_fd();
        self.close_out_fd();
        process::reap_remaining_children();
        FrameAction::Exit(status)
      }
      other => {
        eprintln!("unknown msg {other}");
        FrameAction::Exit(1)
      }
    }
  }

  fn service_outbound_read(&mut self) -> Option<i32> {
    let free = self.channel.buffer_space();
    if free <= MsgHeader::SIZE {
      return None;
    }
    let cap = (free - MsgHeader::SIZE).min(max_chunk(self.version));
    if cap == 0 {
      return None;
    }
    let out_fd = self.out_fd?;
    let mut buf = vec![0u8; cap];
    let n = match fdutil::raw_read(out_fd, &mut buf) {
      Ok(n) => n,
      Err(e) => {
        eprintln!("read: {e}");
        return Some(1);
      }
    };
    buf.truncate(n);
    let msg_type = if self.is_service { MSG_DATA_STDOUT } else { MSG_DATA_STDIN };
    let send_result = self.channel.send_frame(msg_type, &buf);
    if n == 0 {
      self.close_out_fd();
      if self.in_fd.is_none() && self.is_service && self.child.is_none() {
        let _ = self.channel.send_frame(MSG_DATA_EXIT_CODE, &0i32.to_ne_bytes());
        self.close_in_fd();
        process::reap_remaining_children();
        return Some(0);
      }
    }
    if let Err(e) = send_result {
      if !self.channel.is_open() {
        self.close_out_fd();
        if self.in_fd.is_none() {
          return Some(1);
        }
      } else {
        eprintln!("write agent: {e}");
      }
    }
    None
  }

  fn close_in_fd(&mut self) {
    if let Some(fd) = self.in_fd.take() {
      fdutil::shutdown_ignore_enotsock(fd, libc::SHUT_WR);
      if !self.shared_fd || self.out_fd.is_none() {
        let _ = fdutil::set_blocking(fd);
        fdutil::close_fd(fd);
      }
    }
  }

  fn close_out_fd(&mut self) {
    if let Some(fd) = self.out_fd.take() {
      fdutil::shutdown_ignore_enotsock(fd, libc::SHUT_RD);
      if !self.shared_fd || self.in_fd.is_none() {
        let _ = fdutil::set_blocking(fd);
        fdutil::close_fd(fd);
      }
    }
  }
}

enum Readiness {
  Timeout,
  Error(io::Error),
  Ready {
    channel_readable: bool,
    in_writable: bool,
    out_readable: bool,
  },
}

fn write_all_best_effort(fd: RawFd, buf: &[u8]) -> io::Result<()> {
  let mut written = 0;
  while written < buf.len() {
    match fdutil::raw_write(fd, &buf[written..]) {
      Ok(0) => break,
      Ok(n) => written += n,
      Err(e) => return Err(e),
    }
  }
  Ok(())
}
