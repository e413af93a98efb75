//! # sftp-core
//!
//! A pre-authenticated SFTP v3-v6 server engine: framing, version
//! negotiation, a deferred worker pool, request serialization, and a
//! reference filesystem handler.
//!
//! This crate implements the wire-level engine only. It assumes a byte
//! stream already authenticated and authorized by its caller (an SSH
//! subsystem channel, a TLS listener, a Unix socket, whatever) and speaks
//! draft-ietf-secsh-filexfer versions 3 through 6 over it.
//!
//! ## Modules
//!
//! - [`framing`]: length-prefixed packet I/O
//! - [`codec`]: wire primitive encode/decode
//! - [`status`]: errno-to-status mapping and version clamping
//! - [`protocol`]: per-version command tables and capability descriptors
//! - [`job`]: dispatched-request representation and serialization keys
//! - [`serializer`]: FIFO ordering for jobs that touch the same handle or path
//! - [`pool`]: the deferred worker pool
//! - [`session`]: the per-connection dispatcher and init state machine
//! - [`config`]: server configuration
//! - [`handlers`]: request handler implementations, including the
//!   reference `tokio::fs` backend

pub mod codec;
pub mod config;
pub mod error;
pub mod framing;
pub mod handlers;
pub mod job;
pub mod pool;
pub mod protocol;
pub mod serializer;
pub mod session;
pub mod status;

pub use config::{Config, LogFormat, LoggingConfig};
pub use error::{Error, Result};
pub use session::{HandlerOutcome, RequestHandler, Session};
