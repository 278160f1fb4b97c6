//! Relay error types.

use thiserror::Error;

/// Errors that can occur in the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration error (invalid bind address, unreadable TLS files).
    ///
    /// Fatal: prevents startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error.
    ///
    /// Fatal for the endpoint when binding; only affects one client
    /// otherwise.
    #[error("transport error: {0}")]
    Transport(String),

    /// A client sent something the relay cannot forward.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A client gave up on a message before finishing it.
    ///
    /// Only that message is lost; the client stays connected.
    #[error("message abandoned by client (code {code})")]
    Abandoned {
        /// Stream reset code sent by the client.
        code: u64,
    },
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
