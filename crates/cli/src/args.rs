//! Invocation surface: `rexec-client -d DOMAIN [options] REMOTE_CMDLINE`.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
  name = "rexec-client",
  about = "Cross-domain remote-execution client",
  version
)]
pub struct Args {
  /// Target domain. `dom0` / `@adminvm` denote the privileged domain.
  #[arg(short = 'd', value_name = "DOMAIN")]
  pub domain: String,

  /// Spawn a local command whose stdio becomes the data channel's local side.
  #[arg(short = 'l', value_name = "CMD")]
  pub local_cmd: Option<String>,

  /// Just-exec: send the command, do not open a data channel.
  #[arg(short = 'e')]
  pub just_exec: bool,

  /// Service-responder mode: connect as the response to a pending trigger.
  #[arg(short = 'c', value_name = "REQID,SRCNAME,SRCID")]
  pub connect: Option<String>,

  /// Replace non-printable bytes in inbound STDOUT/STDIN frames with `_`.
  /// Unset falls back to the config's `sanitize_output` default.
  #[arg(short = 't')]
  pub sanitize_stdout: bool,

  /// Replace non-printable bytes in inbound STDERR frames with `_`.
  /// Unset falls back to the config's `sanitize_output` default.
  #[arg(short = 'T')]
  pub sanitize_stderr: bool,

  /// Connection timeout in seconds (0 disables). Unset falls back to the
  /// config's `connect_timeout_secs` default.
  #[arg(short = 'w', value_name = "SECS")]
  pub timeout_secs: Option<u64>,

  /// After sending a service connection to a non-privileged target, keep
  /// the broker socket open and wait for its EOF before exiting.
  #[arg(short = 'W')]
  pub wait_for_eof: bool,

  /// The command line to run in the target domain.
  pub remote_cmdline: String,
}

/// Parsed, validated form of `-c REQID,SRCNAME,SRCID`.
#[derive(Debug, Clone)]
pub struct ServiceTrigger {
  pub request_id: String,
  pub src_domain_name: String,
  pub src_domain_id: u32,
}

/// Parses `-c`'s argument. Rejects malformed input and an over-long request
/// id consistently, rather than truncating it.
pub fn parse_service_trigger(raw: &str) -> Result<ServiceTrigger, String> {
  let parts: Vec<&str> = raw.split(',').collect();
  let [request_id, src_domain_name, src_domain_id] = parts.as_slice() else {
    return Err("Invalid -c parameter (should be: \"-c request_id,src_domain_name,src_domain_id\")".to_string());
  };
  if rexec_core::wire::ServiceParams::new(request_id).is_none() {
    return Err(format!(
      "Invalid -c parameter (request_id too long, max {})",
      rexec_core::wire::SERVICE_IDENT_LEN - 1
    ));
  }
  let src_domain_id: u32 = src_domain_id
    .parse()
    .map_err(|_| format!("Invalid -c parameter (src_domain_id {src_domain_id:?} is not a number)"))?;
  Ok(ServiceTrigger {
    request_id: request_id.to_string(),
    src_domain_name: src_domain_name.to_string(),
    src_domain_id,
  })
}
