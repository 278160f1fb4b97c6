//! Quinn-based QUIC endpoint for the relay.
//!
//! Binds a QUIC server endpoint with TLS 1.3 and ALPN set to
//! [`ALPN_PROTOCOL`]. Uses a PEM certificate and key when given, otherwise a
//! freshly generated self-signed certificate for `localhost`. Self-signed
//! mode pairs with the client's development trust setting and is for local
//! testing only.

use std::{net::SocketAddr, sync::Arc};

use quinn::{Endpoint, RecvStream, SendStream, ServerConfig, VarInt};
use tether_client::transport::{ALPN_PROTOCOL, MAX_MESSAGE_SIZE};

use crate::error::RelayError;

/// Receipt reset code for a message the relay would not forward.
const REFUSED: VarInt = VarInt::from_u32(1);

/// QUIC server endpoint.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Create and bind the endpoint.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, RelayError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid bind address '{address}': {e}")))?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            (None, None) => generate_self_signed_config()?,
            _ => {
                return Err(RelayError::Config(
                    "certificate and key must be given together".to_string(),
                ));
            },
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| RelayError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!("QUIC transport bound to {}", addr);

        Ok(Self { endpoint })
    }

    /// Accept the next connection attempt.
    ///
    /// The handshake is left to the caller so a slow client never holds up
    /// the accept loop. Returns `None` once the endpoint is closed.
    pub async fn accept(&self) -> Option<quinn::Incoming> {
        self.endpoint.accept().await
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.endpoint
            .local_addr()
            .map_err(|e| RelayError::Transport(format!("failed to get local address: {e}")))
    }

    /// Close every connection and stop accepting.
    pub fn close(&self, code: u32, reason: &str) {
        self.endpoint.close(VarInt::from_u32(code), reason.as_bytes());
    }

    /// Wait until every connection has finished closing.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}

/// Complete the handshake for an accepted connection attempt.
pub(crate) async fn handshake(
    incoming: quinn::Incoming,
) -> Result<quinn::Connection, RelayError> {
    incoming.await.map_err(|e| RelayError::Transport(format!("connection failed: {e}")))
}

/// Read one client message: the whole send half of a bidirectional stream.
pub(crate) async fn read_message(mut recv: RecvStream) -> Result<Vec<u8>, RelayError> {
    recv.read_to_end(MAX_MESSAGE_SIZE).await.map_err(|e| match e {
        quinn::ReadToEndError::TooLong => {
            RelayError::Protocol(format!("message exceeds {MAX_MESSAGE_SIZE} bytes"))
        },
        quinn::ReadToEndError::Read(quinn::ReadError::Reset(code)) => {
            RelayError::Abandoned { code: code.into_inner() }
        },
        quinn::ReadToEndError::Read(e) => RelayError::Transport(format!("read failed: {e}")),
    })
}

/// Tell the client its message has been taken by finishing the reply half.
pub(crate) fn send_receipt(mut receipt: SendStream) -> Result<(), RelayError> {
    receipt.finish().map_err(|e| RelayError::Transport(format!("receipt failed: {e}")))
}

/// Tell the client its message was not relayed.
pub(crate) fn refuse_receipt(mut receipt: SendStream) {
    let _ = receipt.reset(REFUSED);
}

/// Send one message on a new unidirectional stream.
pub(crate) async fn write_message(
    connection: &quinn::Connection,
    bytes: &[u8],
) -> Result<(), RelayError> {
    let mut send = connection
        .open_uni()
        .await
        .map_err(|e| RelayError::Transport(format!("open_uni failed: {e}")))?;
    send.write_all(bytes)
        .await
        .map_err(|e| RelayError::Transport(format!("write failed: {e}")))?;
    send.finish().map_err(|e| RelayError::Transport(format!("finish failed: {e}")))?;
    Ok(())
}

/// Load TLS configuration from certificate and key files.
fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, RelayError> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| RelayError::Config(format!("failed to read cert '{cert_path}': {e}")))?;

    let key_pem = std::fs::read(key_path)
        .map_err(|e| RelayError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RelayError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| RelayError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| RelayError::Config("no private key found".to_string()))?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RelayError::Config(format!("invalid TLS config: {e}")))?;

    quic_server_config(tls_config)
}

/// Generate a self-signed certificate for testing.
fn generate_self_signed_config() -> Result<ServerConfig, RelayError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| RelayError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_chain = vec![cert.cert.der().clone()];
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())
        .map_err(|e| RelayError::Config(format!("invalid TLS config: {e}")))?;

    tracing::warn!("Using self-signed certificate - not for production use!");

    quic_server_config(tls_config)
}

fn quic_server_config(mut tls_config: rustls::ServerConfig) -> Result<ServerConfig, RelayError> {
    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
        .map_err(|e| RelayError::Config(format!("QUIC config error: {e}")))?;

    Ok(ServerConfig::with_crypto(Arc::new(crypto)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_binds_with_self_signed() {
        let transport = QuinnTransport::bind("127.0.0.1:0", None, None);
        assert!(transport.is_ok(), "Transport should bind with self-signed cert");

        let addr = transport.unwrap().local_addr().unwrap();
        assert_ne!(addr.port(), 0, "Should have assigned a port");
    }

    #[tokio::test]
    async fn transport_rejects_invalid_address() {
        let result = QuinnTransport::bind("invalid:address:format", None, None);
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn transport_rejects_cert_without_key() {
        let result = QuinnTransport::bind("127.0.0.1:0", Some("cert.pem"), None);
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn transport_reports_missing_cert_file() {
        let result =
            QuinnTransport::bind("127.0.0.1:0", Some("/nonexistent/cert.pem"), Some("key.pem"));
        assert!(matches!(result, Err(RelayError::Config(msg)) if msg.contains("failed to read")));
    }
}
