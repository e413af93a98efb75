//! Error types for the SFTP engine.

use thiserror::Error;

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the engine itself can raise.
///
/// Per-request failures that originate in a handler are not represented
/// here — they travel back to the dispatcher as a status code (see
/// [`crate::status`]) or an already-encoded response, never as this type.
/// This enum is for failures that abort the connection or the process.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error reading or writing the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame violated the length-prefix framing contract (zero length,
    /// or a truncated header/body after at least one byte was read).
    #[error("framing error: {0}")]
    Framing(String),

    /// A packet body was shorter than a field it claimed to contain.
    #[error("protocol parse error: {0}")]
    Protocol(String),

    /// Configuration file or value was invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build an [`Error::Protocol`] variant.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Build an [`Error::Framing`] variant.
    pub fn framing(msg: impl Into<String>) -> Self {
        Error::Framing(msg.into())
    }
}
