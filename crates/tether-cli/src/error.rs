//! CLI error types.

use std::io;

use tether_client::ConnectError;
use thiserror::Error;

/// Errors that stop the client before a session starts.
#[derive(Debug, Error)]
pub enum CliError {
    /// The async runtime could not be built.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),

    /// Signal handlers could not be registered.
    #[error("failed to register signal handlers: {0}")]
    Signals(#[source] io::Error),

    /// Connecting to the relay failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),
}
