//! Session runtime.
//!
//! Launches the four session tasks under one cancellation token and acts as
//! the shutdown coordinator:
//!
//! - inbound reader: connection -> incoming queue
//! - outbound reader: terminal input -> connection
//! - display sink: incoming queue -> terminal
//! - signal watcher: SIGINT/SIGTERM -> terminal result
//!
//! The first task to finish with a terminal result decides the
//! [`SessionOutcome`]. The coordinator then closes the connection and fires
//! the token, both exactly once, and returns without joining the tasks.

use std::{future::Future, io, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    sync::mpsc,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::{
    CloseStatus, Connection, ConnectionError, Shutdown, Signal, TaskError, Terminal,
    display::display_sink,
    inbound::{CONNECTION_LOST, inbound_reader},
    outbound::outbound_reader,
    signal::signal_watcher,
};

/// Capacity of the queue between the inbound reader and the display sink.
pub const INCOMING_QUEUE_CAPACITY: usize = 16;

/// Upper bound on a single outbound write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close reason for orderly shutdowns.
const CLOSING: &str = "Closing connection";

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Incoming queue capacity. Values below 1 are treated as 1.
    pub queue_capacity: usize,
    /// Per-write timeout for outbound messages.
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { queue_capacity: INCOMING_QUEUE_CAPACITY, write_timeout: WRITE_TIMEOUT }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Terminal input reached end of stream.
    InputClosed,
    /// Terminal input could not be read.
    InputFailed(io::Error),
    /// An interrupt or terminate signal arrived.
    Interrupted(Signal),
    /// Reading from the server failed.
    ConnectionLost(ConnectionError),
    /// A task panicked, or every task exited without a result.
    Aborted(String),
}

impl SessionOutcome {
    fn from_task(error: TaskError) -> Option<Self> {
        match error {
            TaskError::Read(e) => Some(Self::ConnectionLost(e)),
            TaskError::InputClosed => Some(Self::InputClosed),
            TaskError::Input(e) => Some(Self::InputFailed(e)),
            TaskError::Interrupted(signal) => Some(Self::Interrupted(signal)),
            TaskError::Cancelled => None,
        }
    }

    /// Status the connection is closed with.
    pub fn close_status(&self) -> CloseStatus {
        match self {
            Self::InputClosed | Self::InputFailed(_) | Self::Interrupted(_) => CloseStatus::Normal,
            Self::ConnectionLost(_) | Self::Aborted(_) => CloseStatus::InternalError,
        }
    }

    /// Reason the connection is closed with.
    pub fn close_reason(&self) -> &'static str {
        match self.close_status() {
            CloseStatus::Normal => CLOSING,
            CloseStatus::InternalError => CONNECTION_LOST,
        }
    }

    /// Whether the session ended abnormally.
    ///
    /// Closing input and signals are the expected ways to quit.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::Aborted(_))
    }
}

/// One chat session over one connection.
pub struct Session<C> {
    connection: Arc<C>,
    config: SessionConfig,
}

impl<C: Connection> Session<C> {
    /// Create a session over an established connection.
    pub fn new(connection: C, config: SessionConfig) -> Self {
        Self { connection: Arc::new(connection), config }
    }

    /// Run until input closes, the connection fails, or `interrupt` fires.
    ///
    /// `input` supplies outbound lines, `terminal` receives inbound messages
    /// and notices. Tasks still running when the outcome is decided observe
    /// the cancellation and exit on their own; they are not joined.
    pub async fn run<R, W, F>(self, input: R, terminal: Terminal<W>, interrupt: F) -> SessionOutcome
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = io::Result<Signal>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let shutdown = Shutdown::new(Arc::clone(&self.connection), cancel.clone());
        let (incoming_tx, incoming_rx) = mpsc::channel(self.config.queue_capacity.max(1));

        let mut tasks = JoinSet::new();
        tasks.spawn(inbound_reader(Arc::clone(&self.connection), incoming_tx, shutdown.clone()));
        tasks.spawn(outbound_reader(
            Arc::clone(&self.connection),
            input,
            self.config.write_timeout,
            cancel.clone(),
        ));
        tasks.spawn(display_sink(incoming_rx, terminal.clone(), cancel.clone()));
        tasks.spawn(signal_watcher(interrupt, terminal.clone(), cancel));

        let outcome = supervise(&mut tasks).await;
        tracing::debug!(?outcome, "session ending");

        shutdown.trigger(outcome.close_status(), outcome.close_reason());

        if let SessionOutcome::ConnectionLost(e) = &outcome
            && let Err(write_err) = terminal.notice(&format!("{CONNECTION_LOST}: {e}")).await
        {
            tracing::debug!("Failed to print connection notice: {write_err}");
        }

        tasks.detach_all();
        outcome
    }
}

/// Wait for the first task result that ends the session.
///
/// Clean exits and cancellation results only follow an earlier event, so
/// they are skipped.
async fn supervise(tasks: &mut JoinSet<Result<(), TaskError>>) -> SessionOutcome {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {},
            Ok(Err(error)) => {
                if let Some(outcome) = SessionOutcome::from_task(error) {
                    return outcome;
                }
            },
            Err(e) => {
                tracing::error!("Session task failed: {e}");
                return SessionOutcome::Aborted(e.to_string());
            },
        }
    }

    SessionOutcome::Aborted("all session tasks exited".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_protocol_bounds() {
        let config = SessionConfig::default();
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.write_timeout, Duration::from_secs(5));
    }

    #[test]
    fn outcomes_map_to_close_status() {
        assert_eq!(SessionOutcome::InputClosed.close_status(), CloseStatus::Normal);
        assert_eq!(
            SessionOutcome::Interrupted(Signal::Interrupt).close_status(),
            CloseStatus::Normal
        );
        let lost = SessionOutcome::ConnectionLost(ConnectionError::Closed("reset".into()));
        assert_eq!(lost.close_status(), CloseStatus::InternalError);
        assert_eq!(lost.close_reason(), CONNECTION_LOST);
        assert!(lost.is_failure());
        assert!(!SessionOutcome::InputClosed.is_failure());
    }

    #[test]
    fn cancellation_is_not_an_outcome() {
        assert!(SessionOutcome::from_task(TaskError::Cancelled).is_none());
        assert!(matches!(
            SessionOutcome::from_task(TaskError::InputClosed),
            Some(SessionOutcome::InputClosed)
        ));
    }
}
