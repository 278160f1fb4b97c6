//! Tether development relay.
//!
//! A QUIC server that forwards every message it receives to every connected
//! client, the sender included. With a single client connected it behaves as
//! an echo server.
//!
//! # Architecture
//!
//! ```text
//!   client A ──bi stream──► reader(A) ──┐
//!                                       ├─► Clients::broadcast ──► queue(A) ──► writer(A) ──► client A
//!   client B ──bi stream──► reader(B) ──┘                     └──► queue(B) ──► writer(B) ──► client B
//! ```
//!
//! Each client has one reader task and one writer task. The reader takes one
//! message at a time, so each sender's messages reach every queue in send
//! order. Once a message is queued for everyone the reader finishes the
//! stream's reply half, which is the sender's receipt. The writer opens one
//! unidirectional stream per message in queue order, which the client
//! accepts in the same order.
//!
//! A client that resets a stream has abandoned that one message; the relay
//! skips it and keeps the client.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod transport;

use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

pub use error::RelayError;
use tether_client::CloseStatus;
use tokio::sync::{RwLock, mpsc};
pub use transport::QuinnTransport;

/// Messages buffered per client before broadcasts wait on it.
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to (e.g., "127.0.0.1:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1:4433".to_string(), cert_path: None, key_path: None }
    }
}

/// Connected clients, keyed by session ID.
#[derive(Default)]
struct Clients {
    next_id: AtomicU64,
    outbound: RwLock<HashMap<u64, mpsc::Sender<Arc<[u8]>>>>,
}

impl Clients {
    async fn register(&self, queue: mpsc::Sender<Arc<[u8]>>) -> u64 {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.outbound.write().await.insert(session_id, queue);
        session_id
    }

    async fn unregister(&self, session_id: u64) {
        self.outbound.write().await.remove(&session_id);
    }

    /// Queue `message` for every client.
    async fn broadcast(&self, message: Arc<[u8]>) {
        let queues: Vec<(u64, mpsc::Sender<Arc<[u8]>>)> = {
            let outbound = self.outbound.read().await;
            outbound.iter().map(|(id, queue)| (*id, queue.clone())).collect()
        };

        for (session_id, queue) in queues {
            if queue.send(Arc::clone(&message)).await.is_err() {
                tracing::debug!(session_id, "dropping message for departed client");
            }
        }
    }

    async fn len(&self) -> usize {
        self.outbound.read().await.len()
    }
}

/// Broadcast relay over QUIC.
pub struct Relay {
    transport: QuinnTransport,
    clients: Arc<Clients>,
}

impl Relay {
    /// Create and bind a new relay.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self { transport, clients: Arc::new(Clients::default()) })
    }

    /// Local address the relay is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.transport.local_addr()
    }

    /// Number of clients currently connected.
    pub async fn client_count(&self) -> usize {
        self.clients.len().await
    }

    /// Run until the endpoint closes.
    pub async fn run(self) -> Result<(), RelayError> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` completes, then close every client with
    /// [`CloseStatus::Normal`].
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), RelayError> {
        tracing::info!("Relay listening on {}", self.transport.local_addr()?);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Relay shutting down");
                    self.transport.close(CloseStatus::Normal.code(), "relay shutting down");
                    self.transport.wait_idle().await;
                    break;
                },
                accepted = self.transport.accept() => match accepted {
                    Some(incoming) => {
                        let clients = Arc::clone(&self.clients);
                        tokio::spawn(handle_connection(incoming, clients));
                    },
                    None => break,
                },
            }
        }

        Ok(())
    }
}

/// Serve one client until its connection ends.
async fn handle_connection(incoming: quinn::Incoming, clients: Arc<Clients>) {
    let conn = match transport::handshake(incoming).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!("Accept error: {}", e);
            return;
        },
    };

    let (queue, pending) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let session_id = clients.register(queue).await;

    tracing::info!(session_id, remote = %conn.remote_address(), "client connected");

    tokio::spawn(write_loop(session_id, conn.clone(), pending));

    loop {
        let (receipt, recv) = match conn.accept_bi().await {
            Ok(streams) => streams,
            Err(e) => {
                log_departure(session_id, &e);
                break;
            },
        };

        match transport::read_message(recv).await {
            Ok(bytes) => {
                tracing::trace!(session_id, len = bytes.len(), "relaying message");
                clients.broadcast(Arc::from(bytes)).await;
                if let Err(e) = transport::send_receipt(receipt) {
                    tracing::debug!(session_id, "{}", e);
                }
            },
            Err(RelayError::Abandoned { code }) => {
                tracing::debug!(session_id, code, "client abandoned a message");
            },
            Err(RelayError::Protocol(reason)) => {
                tracing::warn!(session_id, "skipping message: {}", reason);
                transport::refuse_receipt(receipt);
            },
            Err(e) => {
                tracing::debug!(session_id, "read error: {}", e);
                break;
            },
        }
    }

    // Dropping the queue ends the writer once it drains.
    clients.unregister(session_id).await;
}

/// Deliver queued messages to one client, one stream each.
async fn write_loop(
    session_id: u64,
    conn: quinn::Connection,
    mut pending: mpsc::Receiver<Arc<[u8]>>,
) {
    while let Some(message) = pending.recv().await {
        if let Err(e) = transport::write_message(&conn, &message).await {
            tracing::debug!(session_id, "write failed: {}", e);
            break;
        }
    }
}

fn log_departure(session_id: u64, error: &quinn::ConnectionError) {
    match error {
        quinn::ConnectionError::ApplicationClosed(close) => {
            let code = u64::from(close.error_code);
            let reason = String::from_utf8_lossy(&close.reason);
            match CloseStatus::from_code(code) {
                Some(status) => {
                    tracing::info!(session_id, ?status, %reason, "client closed connection");
                },
                None => tracing::info!(session_id, code, %reason, "client closed connection"),
            }
        },
        e => tracing::info!(session_id, "client connection ended: {}", e),
    }
}
