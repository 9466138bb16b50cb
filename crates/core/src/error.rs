//! Typed error taxonomy for the protocol core.
//!
//! One variant per failure mode, `#[error("...")]` messages, so the CLI
//! layer can render a distinct diagnostic for each stage of setup and
//! transport handling.

use thiserror::Error;

/// Failures while opening or tearing down a transport (broker socket or
/// data channel).
#[derive(Debug, Error)]
pub enum ChannelError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("connection timed out")]
  Timeout,
}

/// Failures in the framed message protocol itself (codec, handshake,
/// negotiation, dispatch).
#[derive(Debug, Error)]
pub enum ProtocolError {
  #[error(transparent)]
  Channel(#[from] ChannelError),
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error("frame payload length {len} exceeds maximum {max}")]
  OversizedPayload { len: usize, max: usize },
  #[error("unexpected frame type {got:#x}, expected {expected:#x}")]
  UnexpectedType { got: u32, expected: u32 },
  #[error("malformed HELLO: expected {expected} byte payload, got {got}")]
  MalformedHello { expected: usize, got: usize },
  #[error("malformed negotiation reply: expected {expected} byte payload, got {got}")]
  MalformedNegotiationReply { expected: usize, got: usize },
  #[error("protocol version mismatch: daemon {remote}, client {local}")]
  VersionMismatch { remote: u32, local: u32 },
  #[error("negotiated data protocol version {negotiated} below minimum {minimum}")]
  BelowMinimumVersion { negotiated: u32, minimum: u32 },
}
