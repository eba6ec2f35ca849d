//! Real-time push channel for support chat
//!
//! Holds one authenticated WebSocket to the chat server, reconnects with
//! exponential backoff, and exposes inbound frames as an ordered stream.

pub mod backoff;
pub mod connection;
pub mod protocol;
pub mod transport;
pub mod websocket;

use std::sync::Arc;

use crate::config::Config;

pub use backoff::ReconnectPolicy;
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, ReceivedFrame};
pub use protocol::{InboundFrame, OutboundFrame};

/// Spawn a connection manager configured from `config`, using the real socket.
pub fn spawn_from_config(config: &Config) -> ConnectionManager {
    ConnectionManager::spawn(
        config.ws_url(),
        config.valid_token(),
        ReconnectPolicy::from(&config.chat),
        Arc::new(websocket::WsConnector),
    )
}
