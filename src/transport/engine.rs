//! Protocol engine: upgrade handshake and receive loop for one session.

use std::future::Future;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::debug;

use crate::session::{
    CloseInfo, Message, OpenInfo, Session, SessionEvent, CLOSE_ABNORMAL, CLOSE_NORMAL,
    CLOSE_NO_STATUS,
};

/// How long a locally initiated close waits for the peer's close frame.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of an upgrade handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeStatus {
    pub success: bool,
    /// HTTP status sent (or that would have been sent) for the upgrade.
    pub http_status: u16,
    /// Empty on success.
    pub error: String,
}

impl HandshakeStatus {
    pub fn accepted() -> Self {
        Self {
            success: true,
            http_status: 101,
            error: String::new(),
        }
    }

    pub fn failed(http_status: u16, error: impl Into<String>) -> Self {
        Self {
            success: false,
            http_status,
            error: error.into(),
        }
    }
}

/// Drives the wire protocol of one session.
///
/// One engine is created per accepted connection and owned exclusively by
/// that connection's task. Session options, the message callback and the
/// close request are read from the shared [`Session`] handle.
pub trait ProtocolEngine: Send + 'static {
    /// Raw transport connection this engine upgrades.
    type Connection: Send + 'static;

    /// Perform the upgrade handshake, bounded by `deadline`.
    fn handshake(
        &mut self,
        connection: Self::Connection,
        session: &Session,
        deadline: Duration,
    ) -> impl Future<Output = HandshakeStatus> + Send;

    /// Deliver events to the session until the connection closes, errors,
    /// or a close is requested through [`Session::close`].
    fn run(&mut self, session: &Session) -> impl Future<Output = ()> + Send;
}

/// [`ProtocolEngine`] backed by `tokio-tungstenite` over plain TCP.
///
/// Ping frames are answered by tungstenite itself, and permessage-deflate
/// is not offered by this engine; both session toggles are recorded on the
/// handle for engines that can honor them.
#[derive(Debug, Default)]
pub struct TungsteniteEngine {
    stream: Option<WebSocketStream<TcpStream>>,
    open: OpenInfo,
}

impl TungsteniteEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

fn status_for(error: &WsError) -> u16 {
    match error {
        WsError::Http(response) => response.status().as_u16(),
        WsError::Protocol(_) | WsError::HttpFormat(_) => 400,
        _ => 500,
    }
}

fn open_info(request: &Request) -> OpenInfo {
    let headers = request
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let protocol = request
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    OpenInfo {
        uri: request.uri().to_string(),
        headers,
        protocol,
    }
}

async fn next_outbound(rx: &mut Option<mpsc::UnboundedReceiver<Message>>) -> Option<Message> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read until the peer answers our close frame or the stream ends.
async fn await_close_ack(stream: &mut SplitStream<WebSocketStream<TcpStream>>) {
    let drained = timeout(CLOSE_ACK_TIMEOUT, async {
        while let Some(Ok(frame)) = stream.next().await {
            if frame.is_close() {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!("peer did not acknowledge close within {:?}", CLOSE_ACK_TIMEOUT);
    }
}

impl From<Message> for WsMessage {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => WsMessage::Text(text),
            Message::Binary(data) => WsMessage::Binary(data),
        }
    }
}

impl ProtocolEngine for TungsteniteEngine {
    type Connection = TcpStream;

    async fn handshake(
        &mut self,
        connection: TcpStream,
        session: &Session,
        deadline: Duration,
    ) -> HandshakeStatus {
        if session.is_per_message_deflate_enabled() {
            debug!("permessage-deflate not offered by this engine, continuing uncompressed");
        }

        let mut open = None;
        let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            open = Some(open_info(request));
            Ok(response)
        };
        let outcome = timeout(deadline, accept_hdr_async(connection, capture)).await;

        match outcome {
            Err(_) => HandshakeStatus::failed(
                408,
                format!("handshake timed out after {:?}", deadline),
            ),
            Ok(Err(e)) => HandshakeStatus::failed(status_for(&e), e.to_string()),
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                self.open = open.unwrap_or_default();
                HandshakeStatus::accepted()
            }
        }
    }

    async fn run(&mut self, session: &Session) {
        let Some(ws) = self.stream.take() else {
            return;
        };
        let (mut sink, mut stream) = ws.split();
        let mut outbound = session.take_outbound();
        let close = session.close_token();

        session.dispatch(&SessionEvent::Open(std::mem::take(&mut self.open)));

        let close_info = loop {
            tokio::select! {
                _ = close.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "Normal closure".into(),
                    };
                    if sink.send(WsMessage::Close(Some(frame))).await.is_ok() {
                        await_close_ack(&mut stream).await;
                    }
                    break CloseInfo::new(CLOSE_NORMAL, "Normal closure", false);
                }
                Some(message) = next_outbound(&mut outbound) => {
                    if let Err(e) = sink.send(message.into()).await {
                        session.dispatch(&SessionEvent::Error(e.to_string()));
                        break CloseInfo::new(CLOSE_ABNORMAL, e.to_string(), false);
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        session.dispatch(&SessionEvent::Message(Message::Text(text)));
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        session.dispatch(&SessionEvent::Message(Message::Binary(data)));
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        session.dispatch(&SessionEvent::Ping(data));
                    }
                    Some(Ok(WsMessage::Pong(data))) => {
                        session.dispatch(&SessionEvent::Pong(data));
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        // tungstenite queued the close reply; push it out.
                        let _ = sink.flush().await;
                        break match frame {
                            Some(frame) => CloseInfo::new(frame.code.into(), frame.reason, true),
                            None => CloseInfo::new(CLOSE_NO_STATUS, "", true),
                        };
                    }
                    Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Err(e)) => {
                        session.dispatch(&SessionEvent::Error(e.to_string()));
                        break CloseInfo::new(CLOSE_ABNORMAL, e.to_string(), true);
                    }
                    None => break CloseInfo::new(CLOSE_ABNORMAL, "connection closed", true),
                },
            }
        };

        debug!(code = close_info.code, remote = close_info.remote, "receive loop finished");
        session.dispatch(&SessionEvent::Close(close_info));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionId;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    #[test]
    fn test_status_constructors() {
        let ok = HandshakeStatus::accepted();
        assert!(ok.success);
        assert_eq!(ok.http_status, 101);

        let failed = HandshakeStatus::failed(400, "bad request");
        assert!(!failed.success);
        assert_eq!(failed.error, "bad request");
    }

    #[test]
    fn test_message_conversion() {
        assert_eq!(
            WsMessage::from(Message::Text("t".into())),
            WsMessage::Text("t".into())
        );
        assert_eq!(
            WsMessage::from(Message::Binary(vec![1])),
            WsMessage::Binary(vec![1])
        );
    }

    #[tokio::test]
    async fn test_handshake_deadline() {
        let (server, _client) = pair().await;
        let session = Session::new(ConnectionId::new());
        let mut engine = TungsteniteEngine::new();

        // Client never sends an upgrade request.
        let status = engine
            .handshake(server, &session, Duration::from_millis(100))
            .await;

        assert!(!status.success);
        assert_eq!(status.http_status, 408);
        assert!(status.error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_handshake_rejects_plain_http() {
        let (server, mut client) = pair().await;
        let session = Session::new(ConnectionId::new());
        let mut engine = TungsteniteEngine::new();

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let status = engine
            .handshake(server, &session, Duration::from_secs(2))
            .await;
        assert!(!status.success);
        assert_eq!(status.http_status, 400);

        // Run on a failed engine returns immediately.
        engine.run(&session).await;
        let mut buf = Vec::new();
        let _ = client.read_to_end(&mut buf).await;
    }
}
