//! Live chat core: routing, session state and outbound operations

pub mod gateway;
pub mod listen;
pub mod notify;
pub mod router;
pub mod runtime;
pub mod store;
pub mod upsert;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::ApiClient;
use crate::config::Config;
use crate::realtime::{self, ConnectionManager};

pub use gateway::ChatGateway;
pub use notify::{Notice, Notifier};
pub use runtime::{ChatRuntime, StoreCommand, StoreHandle};
pub use store::{ChatSnapshot, TypingIndicator};

/// A running chat client: socket, store and gateway wired together.
pub struct ChatClient {
    pub connection: ConnectionManager,
    pub store: StoreHandle,
    pub gateway: ChatGateway,
}

impl ChatClient {
    /// Start all components from config and open the socket.
    pub fn start(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let api: Arc<dyn crate::api::ChatApi> =
            Arc::new(ApiClient::new(config).context("Cannot start chat client")?);
        let connection = realtime::spawn_from_config(config);
        let store = ChatRuntime::spawn(
            Arc::clone(&api),
            &connection,
            config.user_id.clone(),
            config.chat.typing_timeout(),
            config.chat.refresh_interval(),
            notifier,
        );
        let gateway = ChatGateway::new(
            api,
            connection.clone(),
            store.clone(),
            config.chat.follow_up_delay(),
            config.chat.typing_timeout(),
        );

        connection.connect();
        Ok(Self {
            connection,
            store,
            gateway,
        })
    }

    pub fn shutdown(&self) {
        self.connection.disconnect();
    }
}
