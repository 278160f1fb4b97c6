//! Inbound reader task.
//!
//! Pulls frames off the connection and pushes them onto the incoming queue.
//! A read error is terminal for the whole session: the connection is closed
//! with [`CloseStatus::InternalError`] right away so the other tasks blocked
//! on it wake up, and the error becomes this task's result. No retries.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{CloseStatus, Connection, ConnectionError, Message, Shutdown, TaskError};

/// Close reason sent when the server connection fails.
pub(crate) const CONNECTION_LOST: &str = "Server connection lost";

/// Run the inbound reader until the connection fails or the session ends.
///
/// Pushing onto a full queue waits for the display sink; that wait is
/// backpressure, not an error.
pub async fn inbound_reader<C: Connection>(
    connection: Arc<C>,
    incoming: mpsc::Sender<Message>,
    shutdown: Shutdown<C>,
) -> Result<(), TaskError> {
    let cancel = shutdown.token().clone();

    loop {
        let message = match connection.read(&cancel).await {
            Ok(message) => message,
            Err(ConnectionError::Cancelled) => return Err(TaskError::Cancelled),
            Err(e) => {
                tracing::warn!("Read failed: {e}");
                shutdown.trigger(CloseStatus::InternalError, CONNECTION_LOST);
                return Err(TaskError::Read(e));
            },
        };

        tracing::trace!(len = message.len(), "received message");

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TaskError::Cancelled),
            sent = incoming.send(message) => {
                // Display sink gone: the session is ending.
                if sent.is_err() {
                    return Err(TaskError::Cancelled);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::memory;

    #[tokio::test]
    async fn forwards_frames_in_order() {
        let (conn, peer) = memory::pair(8);
        let conn = Arc::new(conn);
        let shutdown = Shutdown::new(Arc::clone(&conn), CancellationToken::new());
        let (tx, mut rx) = mpsc::channel(16);

        let task = tokio::spawn(inbound_reader(conn, tx, shutdown.clone()));

        for text in ["one", "two", "three"] {
            peer.send(text).await.unwrap();
        }
        for text in ["one", "two", "three"] {
            assert_eq!(rx.recv().await.unwrap(), Message::from(text));
        }

        shutdown.trigger(CloseStatus::Normal, "done");
        let result = task.await.unwrap();
        assert!(matches!(result, Err(TaskError::Cancelled)));
    }

    #[tokio::test]
    async fn read_error_closes_with_internal_error() {
        let (conn, peer) = memory::pair(8);
        let conn = Arc::new(conn);
        let shutdown = Shutdown::new(Arc::clone(&conn), CancellationToken::new());
        let (tx, _rx) = mpsc::channel(16);

        peer.fail("reset by peer").await.unwrap();
        let result = inbound_reader(conn, tx, shutdown.clone()).await;

        assert!(matches!(result, Err(TaskError::Read(ConnectionError::Stream(_)))));
        assert_eq!(peer.close_status(), Some(CloseStatus::InternalError));
        assert_eq!(peer.close_reason(), Some(CONNECTION_LOST));
        assert!(shutdown.token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_blocks_without_dropping() {
        let (conn, peer) = memory::pair(64);
        let conn = Arc::new(conn);
        let shutdown = Shutdown::new(Arc::clone(&conn), CancellationToken::new());
        let (tx, mut rx) = mpsc::channel(16);

        let task = tokio::spawn(inbound_reader(conn, tx.clone(), shutdown.clone()));

        for i in 0..17 {
            peer.send(format!("m{i}")).await.unwrap();
        }

        // Queue fills to capacity; the 17th frame waits inside the reader.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(tx.capacity(), 0);
        assert!(!task.is_finished());

        for i in 0..17 {
            assert_eq!(rx.recv().await.unwrap(), Message::from(format!("m{i}")));
        }

        shutdown.trigger(CloseStatus::Normal, "done");
        assert!(matches!(task.await.unwrap(), Err(TaskError::Cancelled)));
    }
}
