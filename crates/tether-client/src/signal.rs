//! Process signal handling.
//!
//! [`Interrupts`] registers for SIGINT and SIGTERM (Ctrl-C elsewhere) up
//! front, before the connection is made, so a signal that arrives during
//! the handshake is not lost.

use std::{fmt, future::Future, io};

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::{TaskError, Terminal};

/// An external request to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            Self::Terminate => write!(f, "terminated"),
        }
    }
}

/// Registered interrupt and terminate handlers.
pub struct Interrupts {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Interrupts {
    /// Register the signal handlers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register() -> io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the first signal.
    pub async fn recv(self) -> io::Result<Signal> {
        #[cfg(unix)]
        {
            let Self { mut interrupt, mut terminate } = self;
            tokio::select! {
                _ = interrupt.recv() => Ok(Signal::Interrupt),
                _ = terminate.recv() => Ok(Signal::Terminate),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self;
            tokio::signal::ctrl_c().await?;
            Ok(Signal::Interrupt)
        }
    }
}

/// Watch for `interrupt` and report it as this task's terminal result.
///
/// Prints a short notice naming the signal before returning, so it shows up
/// ahead of the close. If the signal source itself fails, the watcher logs
/// and idles until the session ends some other way.
pub(crate) async fn signal_watcher<F, W>(
    interrupt: F,
    terminal: Terminal<W>,
    cancel: CancellationToken,
) -> Result<(), TaskError>
where
    F: Future<Output = io::Result<Signal>>,
    W: AsyncWrite + Unpin + Send,
{
    let received = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(TaskError::Cancelled),
        received = interrupt => received,
    };

    match received {
        Ok(signal) => {
            tracing::info!("Received {signal}");
            if let Err(e) = terminal.notice(&format!("\n{signal}")).await {
                tracing::debug!("Failed to print signal notice: {e}");
            }
            Err(TaskError::Interrupted(signal))
        },
        Err(e) => {
            tracing::warn!("Signal handling unavailable: {e}");
            cancel.cancelled().await;
            Err(TaskError::Cancelled)
        },
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    #[tokio::test]
    async fn reports_signal_and_prints_notice() {
        let (writer, reader) = tokio::io::duplex(64);

        let result = signal_watcher(
            async { Ok(Signal::Terminate) },
            Terminal::new(writer),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(TaskError::Interrupted(Signal::Terminate))));
        let mut lines = BufReader::new(reader).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("terminated"));
    }

    #[tokio::test]
    async fn failed_signal_source_waits_for_cancel() {
        let (writer, _reader) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(signal_watcher(
            async { Err(io::Error::other("no handlers")) },
            Terminal::new(writer),
            cancel.clone(),
        ));

        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn signals_display_like_the_os_names() {
        assert_eq!(Signal::Interrupt.to_string(), "interrupt");
        assert_eq!(Signal::Terminate.to_string(), "terminated");
    }
}
