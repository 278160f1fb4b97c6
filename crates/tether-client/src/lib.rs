//! Tether client.
//!
//! Concurrency and shutdown core for the Tether chat client. One connection
//! to a chat server is bridged to a line-oriented terminal session by four
//! tasks sharing a single cancellation token.
//!
//! # Architecture
//!
//! ```text
//! Connection ──read──> inbound ──queue(16)──> display ──> terminal
//! terminal   ──line──> outbound ──write(5s)──> Connection
//! signal watcher ─┐
//! task failures ──┴──> shutdown: close connection once, cancel once
//! ```
//!
//! # Components
//!
//! - [`Connection`]: Transport contract (read, write, close)
//! - [`Session`]: Launches the tasks and coordinates shutdown
//! - [`Shutdown`]: First-wins close-and-cancel guard
//! - [`memory`]: In-process connection and echo server
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::QuicConnection`]: [`Connection`] over QUIC
//! - [`transport::connect`]: Connect to a relay

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod connection;
mod display;
mod error;
mod inbound;
pub mod memory;
mod message;
mod outbound;
mod session;
mod shutdown;
pub mod signal;

#[cfg(feature = "transport")]
pub mod transport;

pub use connection::{CloseStatus, Connection};
pub use display::{Terminal, display_sink};
pub use error::{ConnectError, ConnectionError, TaskError};
pub use inbound::inbound_reader;
pub use message::Message;
pub use outbound::outbound_reader;
pub use session::{INCOMING_QUEUE_CAPACITY, Session, SessionConfig, SessionOutcome, WRITE_TIMEOUT};
pub use shutdown::Shutdown;
pub use signal::Signal;
