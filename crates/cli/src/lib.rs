//! CLI for `rexec-client`.
//!
//! Responsibilities:
//! - Parse the invocation surface.
//! - Enforce the usage-error diagnostics the broker is never contacted for.
//! - Drive the three control-flow branches a session can take: privileged
//!   target (dom0/@adminvm), non-privileged service-responder (`-c`), and
//!   plain initiator.
//! - Wire broker session, agent handshake, local-process adapter, and the
//!   event loop together and return the process exit code.

pub mod args;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::debug;

use rexec_core::adapters::{broker, process};
use rexec_core::config::Config;
use rexec_core::handshake::agent_handshake;
use rexec_core::session::{SanitizeOptions, Session};
use rexec_core::wire::{MAX_QREXEC_CMD_LEN, MSG_EXEC_CMDLINE, MSG_JUST_EXEC, ServiceParams};

use args::{Args, ServiceTrigger, parse_service_trigger};

const PRIVILEGED_DOMAIN_NAMES: [&str; 2] = ["dom0", "@adminvm"];

fn is_privileged(domain: &str) -> bool {
  PRIVILEGED_DOMAIN_NAMES.contains(&domain)
}

/// Parses argv, runs the session, and returns the process exit code. Usage
/// errors (mutual exclusivity, command-line length, `-c` parsing) are
/// reported before any broker contact.
pub fn run(config: Config) -> i32 {
  let args = Args::parse();
  match run_with_args(args, config) {
    Ok(code) => code,
    Err(e) => {
      eprintln!("{e:#}");
      1
    }
  }
}

fn run_with_args(args: Args, config: Config) -> Result<i32> {
  validate_args(&args)?;

  let trigger = args.connect.as_deref().map(parse_service_trigger).transpose().map_err(anyhow::Error::msg)?;
  let timeout_secs = args.timeout_secs.unwrap_or(config.connect_timeout_secs);
  let timeout = if timeout_secs == 0 { None } else { Some(Duration::from_secs(timeout_secs)) };
  let socket_dir = rexec_core::config::resolve_socket_dir(config.socket_dir.as_deref()).context("resolving broker socket directory")?;
  let sanitize = SanitizeOptions {
    stdout: args.sanitize_stdout || config.sanitize_output,
    stderr: args.sanitize_stderr || config.sanitize_output,
  };

  if is_privileged(&args.domain) {
    debug!(event = "branch_selected", branch = "privileged_target", domain = %args.domain);
    run_privileged_target(&args, trigger.expect("validated above"), &socket_dir, timeout, sanitize)
  } else if let Some(trigger) = trigger {
    debug!(event = "branch_selected", branch = "service_responder", domain = %args.domain);
    run_service_responder(&args, trigger, &socket_dir, timeout)
  } else {
    debug!(event = "branch_selected", branch = "plain_initiator", domain = %args.domain);
    run_plain_initiator(&args, &socket_dir, timeout, sanitize)
  }
}

/// Usage checks that never touch the broker.
fn validate_args(args: &Args) -> Result<()> {
  let exclusive_count = args.just_exec as u8 + args.connect.is_some() as u8 + args.local_cmd.is_some() as u8;
  if exclusive_count > 1 {
    bail!("only one of -e, -l, -c can be specified");
  }
  if is_privileged(&args.domain) && args.connect.is_none() {
    bail!("when target domain is 'dom0', -c must be specified");
  }
  let len = args.remote_cmdline.len() + 1; // includes the NUL terminator sent on the wire
  if len < 2 || len > MAX_QREXEC_CMD_LEN {
    bail!("invalid command line length ({len} bytes including NUL, must be in [2, {MAX_QREXEC_CMD_LEN}])");
  }
  if args.wait_for_eof && !(args.connect.is_some() && !is_privileged(&args.domain)) {
    eprintln!("note: -W has no effect unless -c targets a non-privileged domain");
  }
  Ok(())
}

/// Target is dom0/@adminvm: the client hosts the local side of the service
/// itself. The negotiation happens over `src_domain_name`'s broker socket,
/// not the (ignored, always "dom0") `-d` target.
fn run_privileged_target(
  args: &Args,
  trigger: ServiceTrigger,
  socket_dir: &std::path::Path,
  timeout: Option<Duration>,
  sanitize: SanitizeOptions,
) -> Result<i32> {
  let ident = ServiceParams::new(&trigger.request_id).context("request id too long")?;

  unsafe {
    std::env::set_var("QREXEC_REMOTE_DOMAIN", &trigger.src_domain_name);
  }

  let mut stream = broker::connect(socket_dir, &trigger.src_domain_name).context("connecting to broker")?;
  broker::broker_handshake(&mut stream).context("broker handshake")?;
  let (data_domain, data_port) =
    broker::negotiate(&mut stream, 0, rexec_core::wire::MSG_SERVICE_CONNECT, &ident.to_bytes()).context("negotiating data channel")?;
  drop(stream);

  let endpoints = process::prepare(Some(&args.remote_cmdline)).context("spawning local command")?;

  let mut channel =
    rexec_core::adapters::channel::DataChannel::connect(socket_dir, data_domain, data_port, timeout).context("opening data channel")?;
  let version = agent_handshake(&mut channel, true).context("agent handshake")?;

  let session = Session::new(channel, version, endpoints, true, sanitize);
  Ok(session.run())
}

/// Target is a named peer domain and `-c` was given: this client relays a
/// response to an existing service call. No data channel or event loop runs
/// in this branch — negotiation plus an optional SERVICE_CONNECT handoff is
/// the entire session.
fn run_service_responder(args: &Args, trigger: ServiceTrigger, socket_dir: &std::path::Path, _timeout: Option<Duration>) -> Result<i32> {
  let msg_type = if args.just_exec { MSG_JUST_EXEC } else { MSG_EXEC_CMDLINE };
  let mut cmdline = args.remote_cmdline.as_bytes().to_vec();
  cmdline.push(0);

  let mut stream = broker::connect(socket_dir, &args.domain).context("connecting to broker")?;
  broker::broker_handshake(&mut stream).context("broker handshake")?;
  let (data_domain, data_port) =
    broker::negotiate(&mut stream, trigger.src_domain_id, msg_type, &cmdline).context("negotiating data channel")?;

  let kept_socket = if args.wait_for_eof { Some(stream) } else { None };

  unsafe {
    std::env::set_var("QREXEC_REMOTE_DOMAIN", &args.domain);
  }

  let ident = ServiceParams::new(&trigger.request_id).context("request id too long")?;
  let mut src_stream = broker::connect(socket_dir, &trigger.src_domain_name).context("connecting to source domain broker")?;
  broker::send_service_connect(&mut src_stream, ident, data_domain, data_port).context("sending service connect")?;
  drop(src_stream);

  if let Some(mut stream) = kept_socket {
    broker::wait_for_eof(&mut stream).context("waiting for broker socket EOF")?;
  }
  Ok(0)
}

/// Plain initiator: negotiate a fresh channel over the `-d` target's broker,
/// spawn (or adopt) local endpoints, open the channel as server, and run the
/// event loop. `-e` is fire-and-forget: negotiate only, then exit (see
/// DESIGN.md for why this diverges from the reference daemon's behavior).
fn run_plain_initiator(args: &Args, socket_dir: &std::path::Path, timeout: Option<Duration>, sanitize: SanitizeOptions) -> Result<i32> {
  let msg_type = if args.just_exec { MSG_JUST_EXEC } else { MSG_EXEC_CMDLINE };
  let mut cmdline = args.remote_cmdline.as_bytes().to_vec();
  cmdline.push(0);

  let mut stream = broker::connect(socket_dir, &args.domain).context("connecting to broker")?;
  broker::broker_handshake(&mut stream).context("broker handshake")?;
  let (data_domain, data_port) = broker::negotiate(&mut stream, 0, msg_type, &cmdline).context("negotiating data channel")?;
  drop(stream);

  if args.just_exec {
    return Ok(0);
  }

  unsafe {
    std::env::set_var("QREXEC_REMOTE_DOMAIN", &args.domain);
  }

  let endpoints = process::prepare(args.local_cmd.as_deref()).context("preparing local endpoints")?;

  let mut channel = rexec_core::adapters::channel::DataChannel::listen_then_accept(socket_dir, data_domain, data_port, timeout)
    .context("opening data channel")?;
  let version = agent_handshake(&mut channel, false).context("agent handshake")?;

  let session = Session::new(channel, version, endpoints, false, sanitize);
  Ok(session.run())
}
