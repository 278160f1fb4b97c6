//! Outbound reader task.
//!
//! Reads terminal input a line at a time and writes each line to the
//! connection. End of input ends the session (the user quit). Write
//! failures are different: a failed or timed-out write drops that one
//! message and the loop moves on to the next line.

use std::{sync::Arc, time::Duration};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use crate::{Connection, ConnectionError, Message, TaskError};

/// Run the outbound reader until input ends or the session is cancelled.
///
/// Each write is bounded by `write_timeout` from the moment it starts,
/// whether or not the session has been cancelled.
pub async fn outbound_reader<C, R>(
    connection: Arc<C>,
    mut input: R,
    write_timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), TaskError>
where
    C: Connection,
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();

    loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TaskError::Cancelled),
            read = input.read_until(b'\n', &mut line) => read?,
        };

        if read == 0 {
            tracing::debug!("input closed");
            return Err(TaskError::InputClosed);
        }

        let message = Message::from_line(std::mem::take(&mut line));
        match tokio::time::timeout(write_timeout, connection.write(&cancel, message)).await {
            Ok(Ok(())) => {},
            Ok(Err(ConnectionError::Cancelled)) => return Err(TaskError::Cancelled),
            Ok(Err(e)) => tracing::warn!("Failed to send message: {e}"),
            Err(_) => tracing::warn!("Send timed out after {write_timeout:?}, message dropped"),
        }
    }
}
