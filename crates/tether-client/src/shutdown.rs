//! First-wins shutdown guard.
//!
//! Closing the connection and firing the cancellation token are each done
//! exactly once, by whichever caller gets there first: the inbound reader
//! on a read error, the coordinator on a task failure, or the signal path.
//! Every later call is a no-op.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio_util::sync::CancellationToken;

use crate::{CloseStatus, Connection};

/// Shared handle that closes the connection and cancels the session once.
pub struct Shutdown<C> {
    connection: Arc<C>,
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl<C: Connection> Shutdown<C> {
    /// Create a guard for `connection`, firing `cancel` on shutdown.
    pub fn new(connection: Arc<C>, cancel: CancellationToken) -> Self {
        Self { connection, cancel, fired: Arc::new(AtomicBool::new(false)) }
    }

    /// Close the connection and cancel the session.
    ///
    /// Returns `true` for the call that performed the shutdown, `false` for
    /// every call after it. The close happens before the cancellation, so a
    /// task woken by the token never sees a half-open connection.
    pub fn trigger(&self, status: CloseStatus, reason: &str) -> bool {
        if self.fired.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            tracing::trace!(?status, reason, "shutdown already triggered");
            return false;
        }

        tracing::debug!(?status, reason, "shutting down session");
        self.connection.close(status, reason);
        self.cancel.cancel();
        true
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// The session cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl<C> Clone for Shutdown<C> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            cancel: self.cancel.clone(),
            fired: Arc::clone(&self.fired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory;

    #[tokio::test]
    async fn first_trigger_wins() {
        let (conn, peer) = memory::pair(4);
        let shutdown = Shutdown::new(Arc::new(conn), CancellationToken::new());

        assert!(shutdown.trigger(CloseStatus::InternalError, "server connection lost"));
        assert!(!shutdown.trigger(CloseStatus::Normal, "Closing connection"));

        assert!(shutdown.token().is_cancelled());
        assert!(shutdown.is_triggered());
        assert_eq!(peer.close_status(), Some(CloseStatus::InternalError));
        assert_eq!(peer.close_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_triggers_close_once() {
        let (conn, peer) = memory::pair(4);
        let shutdown = Shutdown::new(Arc::new(conn), CancellationToken::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let status =
                    if i % 2 == 0 { CloseStatus::Normal } else { CloseStatus::InternalError };
                shutdown.trigger(status, "race")
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(peer.close_count(), 1);
        assert!(shutdown.token().is_cancelled());
    }
}
