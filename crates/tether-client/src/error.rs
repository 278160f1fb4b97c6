//! Client error types.

use std::io;

use thiserror::Error;

use crate::Signal;

/// Errors establishing the connection.
///
/// Fatal at startup: no task is launched when connecting fails.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Server address could not be parsed or resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Transport settings are out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local endpoint could not be created.
    #[error("endpoint creation failed: {0}")]
    Endpoint(String),

    /// TLS configuration is unusable (bad CA file, no roots).
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Handshake with the server failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Handshake did not complete within the connect timeout.
    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors from an established connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection was closed, locally or by the peer.
    #[error("connection closed: {0}")]
    Closed(String),

    /// Operation was abandoned because the session was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Stream-level failure.
    #[error("stream error: {0}")]
    Stream(String),

    /// Message is larger than the transport accepts.
    #[error("message exceeds limit of {limit} bytes")]
    TooLarge {
        /// Maximum accepted size.
        limit: usize,
    },
}

/// Terminal result of a session task.
///
/// Any of these ends the session. [`TaskError::InputClosed`] is the normal
/// way out: the user closed standard input.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Reading from the connection failed.
    #[error("server connection lost: {0}")]
    Read(#[source] ConnectionError),

    /// Terminal input reached end of stream.
    #[error("input closed")]
    InputClosed,

    /// Terminal input could not be read.
    #[error("input error: {0}")]
    Input(#[from] io::Error),

    /// The process was asked to stop.
    #[error("received {0}")]
    Interrupted(Signal),

    /// Task observed cancellation.
    #[error("cancelled")]
    Cancelled,
}
