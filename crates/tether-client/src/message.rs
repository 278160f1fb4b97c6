//! Chat message.

use std::{borrow::Cow, fmt};

use bytes::Bytes;

/// One unit of chat text, inbound or outbound.
///
/// Opaque and immutable. The producer decides the framing: a terminal line
/// for outbound messages, a transport frame for inbound ones. Clones share
/// the underlying buffer.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Message(Bytes);

impl Message {
    /// Create a message from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Build an outbound message from one line of terminal input.
    ///
    /// Strips the trailing `\n` (and a preceding `\r`) left by the line
    /// reader.
    pub fn from_line(mut line: Vec<u8>) -> Self {
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Self(Bytes::from(line))
    }

    /// Raw message bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the message, returning the shared buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the message carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Displayable text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&'static str> for Message {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Message").field(&self.text()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_line_strips_newline() {
        assert_eq!(Message::from_line(b"hello\n".to_vec()), Message::from("hello"));
    }

    #[test]
    fn from_line_strips_crlf() {
        assert_eq!(Message::from_line(b"hello\r\n".to_vec()), Message::from("hello"));
    }

    #[test]
    fn from_line_keeps_unterminated_text() {
        assert_eq!(Message::from_line(b"partial".to_vec()), Message::from("partial"));
    }

    #[test]
    fn from_line_keeps_inner_carriage_return() {
        let msg = Message::from_line(b"a\rb\n".to_vec());
        assert_eq!(msg.as_bytes(), b"a\rb");
    }

    #[test]
    fn text_replaces_invalid_utf8() {
        let msg = Message::new(vec![b'h', 0xff, b'i']);
        assert_eq!(msg.text(), "h\u{fffd}i");
    }
}
