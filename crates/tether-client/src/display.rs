//! Display sink task and terminal output.

use std::{io, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, mpsc},
};
use tokio_util::sync::CancellationToken;

use crate::{Message, TaskError};

/// Longest a shutdown notice may wait on a stalled terminal.
pub(crate) const NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Line-oriented terminal output shared by the display sink and notices.
///
/// Each line is written and flushed under one lock, so a notice never
/// splits a chat message.
pub struct Terminal<W> {
    out: Arc<Mutex<W>>,
}

impl<W> Clone for Terminal<W> {
    fn clone(&self) -> Self {
        Self { out: Arc::clone(&self.out) }
    }
}

impl<W: AsyncWrite + Unpin + Send> Terminal<W> {
    /// Wrap an output stream.
    pub fn new(out: W) -> Self {
        Self { out: Arc::new(Mutex::new(out)) }
    }

    /// Write `text` followed by a newline.
    pub async fn line(&self, text: &str) -> io::Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await
    }

    /// Write a shutdown notice, giving up after [`NOTICE_TIMEOUT`].
    pub(crate) async fn notice(&self, text: &str) -> io::Result<()> {
        tokio::time::timeout(NOTICE_TIMEOUT, self.line(text))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "terminal stalled"))?
    }

    /// Render one inbound message as a single line.
    pub async fn render(&self, message: &Message) -> io::Result<()> {
        let text = message.text();
        self.line(text.strip_suffix('\n').unwrap_or(&*text)).await
    }
}

/// Run the display sink until the session is cancelled.
///
/// Messages are rendered in queue order. Render failures are logged and
/// skipped. Cancellation is a clean exit, not an error, and also abandons a
/// render stuck on a stalled terminal.
pub async fn display_sink<W>(
    mut incoming: mpsc::Receiver<Message>,
    terminal: Terminal<W>,
    cancel: CancellationToken,
) -> Result<(), TaskError>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            received = incoming.recv() => match received {
                Some(message) => message,
                None => return Ok(()),
            },
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            rendered = terminal.render(&message) => {
                if let Err(e) = rendered {
                    tracing::warn!("Failed to render message: {e}");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    #[tokio::test]
    async fn renders_messages_as_lines() {
        let (writer, reader) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(display_sink(rx, Terminal::new(writer), cancel.clone()));

        tx.send(Message::from("hello")).await.unwrap();
        tx.send(Message::from("with newline\n")).await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("with newline"));

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancellation_is_clean_exit() {
        let (writer, _reader) = tokio::io::duplex(64);
        let (_tx, rx) = mpsc::channel::<Message>(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = display_sink(rx, Terminal::new(writer), cancel).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancellation_abandons_stalled_render() {
        // Nobody reads the pipe, so the long line never finishes writing.
        let (writer, _reader) = tokio::io::duplex(8);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(display_sink(rx, Terminal::new(writer), cancel.clone()));
        tx.send(Message::from("a line much longer than the pipe")).await.unwrap();
        tokio::task::yield_now().await;

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap();
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn notice_gives_up_on_stalled_terminal() {
        let (writer, _reader) = tokio::io::duplex(8);
        let terminal = Terminal::new(writer);

        let result = terminal.notice("a notice much longer than the pipe").await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn render_error_does_not_stop_sink() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);
        let (tx, rx) = mpsc::channel(16);

        tx.send(Message::from("nobody listening")).await.unwrap();
        drop(tx);

        let result = display_sink(rx, Terminal::new(writer), CancellationToken::new()).await;

        assert!(result.is_ok());
    }
}
