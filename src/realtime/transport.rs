//! Socket abstraction used by the connection manager

use anyhow::Result;
use async_trait::async_trait;

/// What a socket produced on read.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Text(String),
    /// The peer closed the socket, or the stream ended (`code` is `None`).
    Closed { code: Option<u16>, reason: String },
}

/// One open socket.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Next text frame or close. Pings and other control frames are handled
    /// internally.
    async fn recv(&mut self) -> Result<SocketEvent>;

    async fn close(&mut self, code: u16) -> Result<()>;
}

/// Opens sockets. A new socket is created for every connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}
