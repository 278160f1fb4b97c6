//! Connection trait for abstracting the transport.
//!
//! The [`Connection`] trait decouples the session tasks from a specific
//! transport. The QUIC transport and the in-process channel connection both
//! implement it, so the same task code runs in production and in tests.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::{ConnectionError, Message};

/// Close status reported to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseStatus {
    /// Orderly shutdown: user quit or interrupt signal.
    Normal,
    /// Shutdown because the connection failed underneath us.
    InternalError,
}

impl CloseStatus {
    /// Numeric status code carried on the wire.
    ///
    /// Matches the WebSocket close codes (1000, 1011) chat servers commonly
    /// expect.
    pub const fn code(self) -> u32 {
        match self {
            Self::Normal => 1000,
            Self::InternalError => 1011,
        }
    }

    /// Inverse of [`CloseStatus::code`].
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1011 => Some(Self::InternalError),
            _ => None,
        }
    }
}

/// A persistent bidirectional message connection.
///
/// Shared by the inbound and outbound readers behind an `Arc`, so every
/// method takes `&self`. Implementations must allow one `read` and one
/// `write` to be in flight at the same time.
///
/// # Invariants
///
/// - `read` and `write` return promptly with [`ConnectionError::Cancelled`]
///   once `cancel` fires
/// - `close` is idempotent, never fails, and makes every later or pending
///   `read`/`write` fail
pub trait Connection: Send + Sync + 'static {
    /// Receive the next message frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed, the peer misbehaves,
    /// or `cancel` fires first.
    fn read(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Message, ConnectionError>> + Send;

    /// Send one message.
    ///
    /// Callers bound this with their own timeout; dropping the future
    /// abandons the message without corrupting later ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or `cancel` fires first.
    fn write(
        &self,
        cancel: &CancellationToken,
        message: Message,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Close the connection with a status and human-readable reason.
    fn close(&self, status: CloseStatus, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_round_trip() {
        for status in [CloseStatus::Normal, CloseStatus::InternalError] {
            assert_eq!(CloseStatus::from_code(u64::from(status.code())), Some(status));
        }
        assert_eq!(CloseStatus::from_code(0), None);
    }
}
