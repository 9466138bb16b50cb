//! Core library for `rexec-client`.
//!
//! Implements the client endpoint of a cross-domain remote-execution
//! protocol: broker session negotiation, the agent handshake, the local
//! process adapter, and the event loop that multiplexes local standard I/O
//! and an exit status across a data channel to an agent in another
//! isolation domain.
//!
//! Quick start:
//! - Open a broker session with `adapters::broker`.
//! - Open the data channel with `adapters::channel::DataChannel`.
//! - Agree a protocol version with `handshake::agent_handshake`.
//! - Spawn (or adopt) local endpoints with `adapters::process::prepare`.
//! - Hand both to `session::Session::run` to drive the event loop to exit.

pub mod adapters;
pub mod codec;
pub mod config;
mod fdutil;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod sanitize;
pub mod session;
pub mod wire;
pub mod writer;
