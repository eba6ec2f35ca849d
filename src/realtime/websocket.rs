//! WebSocket connection and frame handling

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::transport::{Connector, SocketEvent, Transport};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct ChatSocket {
    stream: WsStream,
}

impl ChatSocket {
    /// Connect to the chat WebSocket endpoint.
    ///
    /// Auth happens in-band: the caller must send the authenticate frame
    /// before anything else.
    pub async fn connect(url: &str) -> Result<Self> {
        let ws_url = url
            .replace("https://", "wss://")
            .replace("http://", "ws://");

        tracing::info!("Connecting WebSocket to {}", ws_url);

        let (stream, response) = connect_async(&ws_url)
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for ChatSocket {
    async fn send_text(&mut self, text: String) -> Result<()> {
        tracing::debug!("WS send: {}", text);
        self.stream
            .send(Message::Text(text))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Receive the next text frame, answering pings and skipping other
    /// control frames.
    async fn recv(&mut self) -> Result<SocketEvent> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    return Ok(SocketEvent::Text(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Ok(SocketEvent::Closed { code, reason });
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(SocketEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                }
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .context("Failed to close WebSocket")
    }
}

/// Production connector backed by tokio-tungstenite.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let socket = ChatSocket::connect(url).await?;
        Ok(Box::new(socket))
    }
}
