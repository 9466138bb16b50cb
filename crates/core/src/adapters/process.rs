//! Local-process adapter: spawns the command named by `-l`, or falls back to
//! the process's own standard streams when none is given.
//!
//! Child reaping is a dedicated thread rather than a `SIGCHLD` handler: a
//! thread blocks on `Child::wait`, records the exit status, and wakes the
//! event loop through a self-pipe rather than a condvar, since the loop here
//! is a single-threaded `poll` loop rather than a condvar-waiting consumer.

use std::io;
use std::os::fd::{IntoRawFd, RawFd};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::fdutil;

/// Command-line prefix recognized as an internal RPC-multiplexer invocation:
/// matching commands are exec'd directly rather than passed to a shell. The
/// real multiplexer binary is an external collaborator; this only needs to
/// recognize the convention and resolve a path.
pub const RPC_MULTIPLEXER_PREFIX: &str = "QUBESRPC ";
const RPC_MULTIPLEXER_BIN: &str = "/usr/lib/qubes/qrexec-rpc-multiplexer";

/// A spawned child's liveness tracking: set by the reaper thread, observed
/// by the event loop through `wake_fd` (one more `PollFd` alongside the
/// channel and local descriptors) and `poll_exit`.
pub struct ChildHandle {
  wake_fd: RawFd,
  exited: Arc<AtomicBool>,
  status: Arc<Mutex<Option<i32>>>,
}

impl ChildHandle {
  pub fn wake_fd(&self) -> RawFd {
    self.wake_fd
  }

  /// Non-blocking: `Some(status)` once the reaper thread has observed the
  /// child exit, `None` while it is still running.
  pub fn poll_exit(&self) -> Option<i32> {
    if self.exited.load(Ordering::Acquire) {
      *self.status.lock().expect("child status mutex poisoned")
    } else {
      None
    }
  }
}

impl Drop for ChildHandle {
  fn drop(&mut self) {
    fdutil::close_fd(self.wake_fd);
  }
}

/// The two local file descriptors plus (if spawned) the child handle.
pub struct LocalEndpoints {
  /// Written to: bytes arriving on the data channel land here.
  pub in_fd: RawFd,
  /// Read from: bytes read here are sent across the data channel.
  pub out_fd: RawFd,
  pub child: Option<ChildHandle>,
}

/// Spawns `cmdline` through the opaque command executor, or defaults to the
/// process's own standard streams when `cmdline` is `None`.
pub fn prepare(cmdline: Option<&str>) -> io::Result<LocalEndpoints> {
  match cmdline {
    None => Ok(LocalEndpoints {
      in_fd: 1,
      out_fd: 0,
      child: None,
    }),
    Some(cmdline) => spawn(cmdline),
  }
}

fn spawn(cmdline: &str) -> io::Result<LocalEndpoints> {
  let mut command = build_command(cmdline);
  command.stdin(Stdio::piped()).stdout(Stdio::piped());

  let mut child = command.spawn()?;
  let stdin = child.stdin.take().expect("piped stdin");
  let stdout = child.stdout.take().expect("piped stdout");
  let in_fd = stdin.into_raw_fd();
  let out_fd = stdout.into_raw_fd();
  fdutil::set_nonblocking(in_fd)?;
  fdutil::set_nonblocking(out_fd)?;

  let handle = spawn_reaper(child)?;

  Ok(LocalEndpoints {
    in_fd,
    out_fd,
    child: Some(handle),
  })
}

fn build_command(cmdline: &str) -> Command {
  if let Some(rest) = cmdline.strip_prefix(RPC_MULTIPLEXER_PREFIX) {
    let mut parts = rest.split_whitespace();
    if let Some(service_arg) = parts.next() {
      let mut cmd = Command::new(RPC_MULTIPLEXER_BIN);
      cmd.arg(service_arg);
      cmd.args(parts);
      return cmd;
    }
  }
  let mut cmd = Command::new("/bin/sh");
  cmd.arg("-c").arg(cmdline);
  cmd
}

fn spawn_reaper(mut child: Child) -> io::Result<ChildHandle> {
  let (read_end, write_end) = nix::unistd::pipe()?;
  let wake_fd = read_end.into_raw_fd();
  let wake_write_fd = write_end.into_raw_fd();

  let exited = Arc::new(AtomicBool::new(false));
  let status = Arc::new(Mutex::new(None));
  let exited_thread = Arc::clone(&exited);
  let status_thread = Arc::clone(&status);

  thread::spawn(move || {
    let code = match child.wait() {
      Ok(exit_status) => exit_status.code().unwrap_or(255),
      Err(_) => 255,
    };
    *status_thread.lock().expect("child status mutex poisoned") = Some(code);
    exited_thread.store(true, Ordering::Release);
    let _ = unsafe { libc::write(wake_write_fd, [0u8].as_ptr() as *const _, 1) };
    fdutil::close_fd(wake_write_fd);
  });

  Ok(ChildHandle {
    wake_fd,
    exited,
    status,
  })
}

/// Best-effort reap of any remaining children, so the broker can reason
/// about this process's subtree once it exits. Only reaps children this
/// process hasn't already waited on explicitly; returns once none remain.
pub fn reap_remaining_children() {
  loop {
    match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
      Ok(WaitStatus::StillAlive) | Err(nix::errno::Errno::ECHILD) => break,
      Ok(_) => continue,
      Err(nix::errno::Errno::EINTR) => continue,
      Err(_) => break,
    }
  }
}
