use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{FrameSink, FrameSource, ProviderTransport, TransportChannel};
use crate::error::RelayError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport: one text message per frame.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ProviderTransport for WebSocketTransport {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> Result<TransportChannel, RelayError> {
        let (socket, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RelayError::connection(&self.url, e.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "websocket connected");

        let (writer, reader) = socket.split();
        Ok(TransportChannel::new(
            WebSocketSink {
                url: self.url.clone(),
                writer,
                closed: false,
            },
            WebSocketSource {
                url: self.url.clone(),
                reader,
            },
        ))
    }
}

struct WebSocketSink {
    url: String,
    writer: SplitSink<Socket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: String) -> Result<(), RelayError> {
        if self.closed {
            return Err(RelayError::Closed(self.url.clone()));
        }
        self.writer
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| RelayError::connection(&self.url, e.to_string()))
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer
            .close()
            .await
            .map_err(|e| RelayError::connection(&self.url, e.to_string()))
    }
}

struct WebSocketSource {
    url: String,
    reader: SplitStream<Socket>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            let message = match self.reader.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(RelayError::connection(&self.url, e.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Binary(bytes) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                        RelayError::Parse(format!("binary frame is not UTF-8: {e}"))
                    }))
                }
                Message::Close(frame) => {
                    debug!(url = %self.url, ?frame, "websocket closed by peer");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}
