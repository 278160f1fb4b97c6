//! QUIC transport for the client.
//!
//! Provides [`QuicConnection`], a [`Connection`] over one QUIC connection.
//! Each message travels on its own stream. Messages from the relay arrive on
//! unidirectional streams, accepted in stream-ID order and read to the end
//! one at a time, so the relay's send order is the delivery order.
//!
//! Messages to the relay go out on bidirectional streams. The relay finishes
//! its half once it has taken the message, and only then does the write
//! complete. Closing the connection right after a write therefore never
//! discards a message the session counted as sent.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use quinn::{ClientConfig, Endpoint, RecvStream, SendStream, VarInt};
use rustls::RootCertStore;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{CloseStatus, ConnectError, Connection, ConnectionError, Message};

/// ALPN protocol identifier. Must match the relay.
pub const ALPN_PROTOCOL: &[u8] = b"tether";

/// Largest message accepted in either direction.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Stream error code for a write abandoned before completion.
const ABANDONED: VarInt = VarInt::from_u32(1);

/// How the client decides to trust the server certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trust {
    /// Accept any certificate.
    ///
    /// WARNING: Development only. Pairs with the relay's self-signed mode.
    AnyCertificate,
    /// Verify against the PEM roots in this file.
    CaFile(PathBuf),
}

/// Client transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Name the server certificate must be valid for.
    pub server_name: String,
    /// Upper bound on the QUIC handshake.
    pub connect_timeout: Duration,
    /// Idle period after which the connection is considered dead. Keep-alives
    /// are sent at a third of this.
    pub idle_timeout: Duration,
    /// Certificate trust policy.
    pub trust: Trust,
}

impl TransportConfig {
    /// Settings for a local relay with a self-signed certificate.
    pub fn development() -> Self {
        Self {
            server_name: "localhost".to_string(),
            connect_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(30),
            trust: Trust::AnyCertificate,
        }
    }

    /// Settings that verify the server against the roots in `ca_file`.
    pub fn with_ca_file(ca_file: impl Into<PathBuf>) -> Self {
        Self { trust: Trust::CaFile(ca_file.into()), ..Self::development() }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// [`Connection`] over QUIC.
pub struct QuicConnection {
    /// Owns the socket; outlives the connection.
    endpoint: Endpoint,
    connection: quinn::Connection,
    /// Serializes accept-and-read so messages are taken in order.
    reading: Mutex<()>,
}

impl QuicConnection {
    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    async fn receive(&self) -> Result<Message, ConnectionError> {
        let _reading = self.reading.lock().await;

        let mut recv = self.connection.accept_uni().await.map_err(closed)?;
        let bytes = recv.read_to_end(MAX_MESSAGE_SIZE).await.map_err(|e| match e {
            quinn::ReadToEndError::TooLong => {
                ConnectionError::TooLarge { limit: MAX_MESSAGE_SIZE }
            },
            quinn::ReadToEndError::Read(e) => {
                ConnectionError::Stream(format!("read failed: {e}"))
            },
        })?;

        Ok(Message::new(bytes))
    }

    async fn send(&self, message: Message) -> Result<(), ConnectionError> {
        let (stream, receipt) = self.connection.open_bi().await.map_err(closed)?;
        Outgoing { stream, receipt, finished: false }.send(message.as_bytes()).await
    }

    /// Handle for waiting out the close handshake once the session is over.
    pub fn drain(&self) -> Drain {
        Drain { endpoint: self.endpoint.clone() }
    }
}

/// Waits for a closed connection's final packets to leave the process.
#[derive(Debug, Clone)]
pub struct Drain {
    endpoint: Endpoint,
}

impl Drain {
    /// Wait up to `limit` for the endpoint to go idle.
    ///
    /// Returns `false` if the limit elapsed first.
    pub async fn wait(self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.endpoint.wait_idle()).await.is_ok()
    }
}

impl Connection for QuicConnection {
    async fn read(&self, cancel: &CancellationToken) -> Result<Message, ConnectionError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ConnectionError::Cancelled),
            received = self.receive() => received,
        }
    }

    async fn write(
        &self,
        cancel: &CancellationToken,
        message: Message,
    ) -> Result<(), ConnectionError> {
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::TooLarge { limit: MAX_MESSAGE_SIZE });
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ConnectionError::Cancelled),
            sent = self.send(message) => sent,
        }
    }

    fn close(&self, status: CloseStatus, reason: &str) {
        tracing::debug!(?status, reason, "closing QUIC connection");
        self.connection.close(VarInt::from_u32(status.code()), reason.as_bytes());
    }
}

/// Outgoing message stream.
///
/// Resets the stream if dropped before the relay's receipt arrives, so a
/// write abandoned by a timeout never reaches the peer as a truncated
/// message.
struct Outgoing {
    stream: SendStream,
    receipt: RecvStream,
    finished: bool,
}

impl Outgoing {
    async fn send(mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| ConnectionError::Stream(format!("write failed: {e}")))?;
        self.stream
            .finish()
            .map_err(|e| ConnectionError::Stream(format!("finish failed: {e}")))?;

        // The receipt is an empty stream the relay finishes after taking
        // the message.
        self.receipt.read_to_end(0).await.map_err(|e| match e {
            quinn::ReadToEndError::TooLong => {
                ConnectionError::Stream("unexpected data in receipt".to_string())
            },
            quinn::ReadToEndError::Read(e) => {
                ConnectionError::Stream(format!("no receipt: {e}"))
            },
        })?;

        self.finished = true;
        Ok(())
    }
}

impl Drop for Outgoing {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.stream.reset(ABANDONED);
            let _ = self.receipt.stop(ABANDONED);
        }
    }
}

fn closed(e: quinn::ConnectionError) -> ConnectionError {
    ConnectionError::Closed(e.to_string())
}

/// Connect to a Tether relay via QUIC.
///
/// `server_addr` is `host:port`; host names are resolved. The handshake is
/// bounded by [`TransportConfig::connect_timeout`].
pub async fn connect(
    server_addr: &str,
    config: TransportConfig,
) -> Result<QuicConnection, ConnectError> {
    let addr = resolve(server_addr).await?;
    let client_config = client_config(&config)?;

    let bind: SocketAddr = if addr.is_ipv6() {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };
    let mut endpoint = Endpoint::client(bind)
        .map_err(|e| ConnectError::Endpoint(e.to_string()))?;
    endpoint.set_default_client_config(client_config);

    let connecting = endpoint
        .connect(addr, &config.server_name)
        .map_err(|e| ConnectError::Handshake(e.to_string()))?;

    let connection = tokio::time::timeout(config.connect_timeout, connecting)
        .await
        .map_err(|_| ConnectError::Timeout(config.connect_timeout))?
        .map_err(|e| ConnectError::Handshake(e.to_string()))?;

    tracing::info!("Connected to {}", connection.remote_address());

    Ok(QuicConnection { endpoint, connection, reading: Mutex::new(()) })
}

async fn resolve(server_addr: &str) -> Result<SocketAddr, ConnectError> {
    if let Ok(addr) = server_addr.parse() {
        return Ok(addr);
    }

    tokio::net::lookup_host(server_addr)
        .await
        .map_err(|e| ConnectError::InvalidAddress(format!("'{server_addr}': {e}")))?
        .next()
        .ok_or_else(|| ConnectError::InvalidAddress(format!("'{server_addr}' did not resolve")))
}

fn client_config(config: &TransportConfig) -> Result<ClientConfig, ConnectError> {
    let builder = rustls::ClientConfig::builder();
    let mut crypto = match &config.trust {
        Trust::AnyCertificate => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
            .with_no_client_auth(),
        Trust::CaFile(path) => {
            builder.with_root_certificates(load_roots(path)?).with_no_client_auth()
        },
    };

    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| ConnectError::Tls(format!("QUIC config error: {e}")))?;
    let mut client = ClientConfig::new(Arc::new(quic));

    let idle = quinn::IdleTimeout::try_from(config.idle_timeout)
        .map_err(|e| ConnectError::Config(format!("invalid idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    transport.keep_alive_interval(Some(config.idle_timeout / 3));
    client.transport_config(Arc::new(transport));

    Ok(client)
}

fn load_roots(path: &Path) -> Result<RootCertStore, ConnectError> {
    let pem = std::fs::read(path).map_err(|e| {
        ConnectError::Tls(format!("failed to read CA file '{}': {e}", path.display()))
    })?;

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &pem[..]) {
        let cert =
            cert.map_err(|e| ConnectError::Tls(format!("failed to parse certificate: {e}")))?;
        roots.add(cert).map_err(|e| ConnectError::Tls(format!("invalid CA certificate: {e}")))?;
    }

    if roots.is_empty() {
        return Err(ConnectError::Tls(format!("no certificates in '{}'", path.display())));
    }

    Ok(roots)
}

/// Certificate verifier that accepts any certificate (insecure, for
/// development).
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
