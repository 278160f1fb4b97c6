//! In-process connection.
//!
//! Channel-backed [`Connection`] with a [`MemoryPeer`] playing the server.
//! No network: messages flow through mpsc channels, so tests can inject read
//! failures, stall writes and observe how the client closed the connection.
//! [`spawn_echo`] runs an in-process echo server for the CLI's loopback mode.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{CloseStatus, Connection, ConnectionError, Message};

/// What the peer pushes towards the client: a frame or a read failure.
type Inbound = Result<Message, String>;

/// State shared between both ends of the pair.
#[derive(Default)]
struct Shared {
    /// Fired by the first `close`.
    closed: CancellationToken,
    /// Status and reason of the first `close`.
    close: OnceLock<(CloseStatus, String)>,
    /// Number of `close` calls, effective or not.
    close_calls: AtomicUsize,
    /// When set, client writes suspend until cancelled or closed.
    stall_writes: AtomicBool,
}

/// Client end of an in-process connection.
pub struct MemoryConnection {
    to_peer: mpsc::Sender<Message>,
    from_peer: Mutex<mpsc::Receiver<Inbound>>,
    shared: Arc<Shared>,
}

/// Server end of an in-process connection.
pub struct MemoryPeer {
    to_client: mpsc::Sender<Inbound>,
    from_client: mpsc::Receiver<Message>,
    shared: Arc<Shared>,
}

/// Create a connected client/peer pair.
///
/// `capacity` bounds each direction's channel.
pub fn pair(capacity: usize) -> (MemoryConnection, MemoryPeer) {
    let (client_tx, peer_rx) = mpsc::channel(capacity);
    let (peer_tx, client_rx) = mpsc::channel(capacity);
    let shared = Arc::new(Shared::default());

    let connection = MemoryConnection {
        to_peer: client_tx,
        from_peer: Mutex::new(client_rx),
        shared: Arc::clone(&shared),
    };
    let peer = MemoryPeer { to_client: peer_tx, from_client: peer_rx, shared };

    (connection, peer)
}

/// Spawn an in-process echo server.
///
/// Every message the client writes is sent straight back. The server task
/// stops when the client closes the connection.
pub fn spawn_echo(capacity: usize) -> MemoryConnection {
    let (connection, mut peer) = pair(capacity);

    tokio::spawn(async move {
        let closed = peer.shared.closed.clone();
        loop {
            tokio::select! {
                () = closed.cancelled() => break,
                received = peer.recv() => {
                    let Some(message) = received else { break };
                    if let Err(e) = peer.send(message).await {
                        tracing::debug!("echo server stopping: {e}");
                        break;
                    }
                }
            }
        }
    });

    connection
}

impl MemoryConnection {
    fn closed_error() -> ConnectionError {
        ConnectionError::Closed("connection closed locally".to_string())
    }
}

impl Connection for MemoryConnection {
    async fn read(&self, cancel: &CancellationToken) -> Result<Message, ConnectionError> {
        let closed = &self.shared.closed;
        if closed.is_cancelled() {
            return Err(Self::closed_error());
        }

        let mut from_peer = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            () = closed.cancelled() => return Err(Self::closed_error()),
            guard = self.from_peer.lock() => guard,
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ConnectionError::Cancelled),
            () = closed.cancelled() => Err(Self::closed_error()),
            frame = from_peer.recv() => match frame {
                Some(Ok(message)) => Ok(message),
                Some(Err(reason)) => Err(ConnectionError::Stream(reason)),
                None => Err(ConnectionError::Closed("peer went away".to_string())),
            },
        }
    }

    async fn write(
        &self,
        cancel: &CancellationToken,
        message: Message,
    ) -> Result<(), ConnectionError> {
        let closed = &self.shared.closed;
        if closed.is_cancelled() {
            return Err(Self::closed_error());
        }

        if self.shared.stall_writes.load(Ordering::Acquire) {
            return tokio::select! {
                () = cancel.cancelled() => Err(ConnectionError::Cancelled),
                () = closed.cancelled() => Err(Self::closed_error()),
            };
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ConnectionError::Cancelled),
            () = closed.cancelled() => Err(Self::closed_error()),
            sent = self.to_peer.send(message) => {
                sent.map_err(|_| ConnectionError::Closed("peer went away".to_string()))
            }
        }
    }

    fn close(&self, status: CloseStatus, reason: &str) {
        self.shared.close_calls.fetch_add(1, Ordering::AcqRel);
        if self.shared.close.set((status, reason.to_string())).is_ok() {
            self.shared.closed.cancel();
        }
    }
}

impl MemoryPeer {
    /// Deliver a message to the client.
    pub async fn send(&self, message: impl Into<Message>) -> Result<(), ConnectionError> {
        self.to_client
            .send(Ok(message.into()))
            .await
            .map_err(|_| ConnectionError::Closed("client went away".to_string()))
    }

    /// Make the client's next read fail with `reason`.
    pub async fn fail(&self, reason: &str) -> Result<(), ConnectionError> {
        self.to_client
            .send(Err(reason.to_string()))
            .await
            .map_err(|_| ConnectionError::Closed("client went away".to_string()))
    }

    /// Receive the next message written by the client.
    ///
    /// Returns `None` once the client end is dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.from_client.recv().await
    }

    /// Suspend client writes until they are cancelled or the connection closes.
    pub fn stall_writes(&self, stall: bool) {
        self.shared.stall_writes.store(stall, Ordering::Release);
    }

    /// Wait until the client closes the connection.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    /// Status of the first close, if the client closed.
    pub fn close_status(&self) -> Option<CloseStatus> {
        self.shared.close.get().map(|(status, _)| *status)
    }

    /// Reason given with the first close.
    pub fn close_reason(&self) -> Option<&str> {
        self.shared.close.get().map(|(_, reason)| reason.as_str())
    }

    /// Number of times the client called `close`.
    pub fn close_count(&self) -> usize {
        self.shared.close_calls.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn echo_server_returns_messages() {
        let conn = spawn_echo(4);
        let cancel = CancellationToken::new();

        conn.write(&cancel, Message::from("ping")).await.unwrap();
        let echoed = conn.read(&cancel).await.unwrap();

        assert_eq!(echoed, Message::from("ping"));
    }

    #[tokio::test]
    async fn close_fails_pending_read() {
        let (conn, _peer) = pair(4);
        let conn = Arc::new(conn);
        let cancel = CancellationToken::new();

        let reader = {
            let conn = Arc::clone(&conn);
            let cancel = cancel.clone();
            tokio::spawn(async move { conn.read(&cancel).await })
        };

        tokio::task::yield_now().await;
        conn.close(CloseStatus::Normal, "bye");

        let result = tokio::time::timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
        assert!(matches!(result, Err(ConnectionError::Closed(_))));
    }

    #[tokio::test]
    async fn operations_fail_after_close() {
        let (conn, peer) = pair(4);
        let cancel = CancellationToken::new();

        conn.close(CloseStatus::InternalError, "lost");
        conn.close(CloseStatus::Normal, "again");

        assert!(conn.read(&cancel).await.is_err());
        assert!(conn.write(&cancel, Message::from("x")).await.is_err());
        assert_eq!(peer.close_status(), Some(CloseStatus::InternalError));
        assert_eq!(peer.close_reason(), Some("lost"));
        assert_eq!(peer.close_count(), 2);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_on_read() {
        let (conn, peer) = pair(4);
        let cancel = CancellationToken::new();

        peer.fail("boom").await.unwrap();

        assert!(matches!(conn.read(&cancel).await, Err(ConnectionError::Stream(r)) if r == "boom"));
    }

    #[tokio::test]
    async fn cancelled_read_returns_promptly() {
        let (conn, _peer) = pair(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(conn.read(&cancel).await, Err(ConnectionError::Cancelled)));
    }

    #[tokio::test]
    async fn stalled_write_waits_for_cancel() {
        let (conn, peer) = pair(4);
        peer.stall_writes(true);
        let cancel = CancellationToken::new();

        let pending =
            tokio::time::timeout(Duration::from_millis(50), conn.write(&cancel, "x".into())).await;
        assert!(pending.is_err(), "stalled write should not complete");

        cancel.cancel();
        assert!(matches!(
            conn.write(&cancel, "x".into()).await,
            Err(ConnectionError::Cancelled)
        ));
    }
}
