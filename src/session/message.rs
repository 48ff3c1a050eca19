//! Session events delivered to message callbacks.

use std::collections::HashMap;

/// Normal closure status code.
pub const CLOSE_NORMAL: u16 = 1000;
/// Status code reported when the peer closed without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Status code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// An application data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(text) => text.len(),
            Message::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Text payload, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Binary(_) => None,
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(data)
    }
}

/// Details of the upgrade request, delivered once the handshake succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenInfo {
    /// Request target, e.g. `/chat?room=1`.
    pub uri: String,
    /// Request headers, lower-cased names.
    pub headers: HashMap<String, String>,
    /// Negotiated subprotocol, if any.
    pub protocol: Option<String>,
}

/// Why and how a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// `true` if the peer initiated the close.
    pub remote: bool,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>, remote: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            remote,
        }
    }
}

/// Everything a session's message callback can observe.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Open(OpenInfo),
    Message(Message),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(CloseInfo),
    Error(String),
}
