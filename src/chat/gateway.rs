//! Outbound chat operations
//!
//! REST calls for session lifecycle and messages, plus typing indicators
//! over the socket. Nothing here writes to the store directly: message and
//! status changes arrive as socket pushes, and the gateway only asks the
//! runtime to re-fetch where a push might be missed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::runtime::StoreHandle;
use crate::api::{ChatApi, ChatError, NewSession};
use crate::models::Priority;
use crate::realtime::{ConnectionManager, OutboundFrame};

#[derive(Clone)]
pub struct ChatGateway {
    api: Arc<dyn ChatApi>,
    connection: ConnectionManager,
    store: StoreHandle,
    follow_up_delay: Duration,
    typing_timeout: Duration,
    /// Pending auto-stop for the last typing indicator sent.
    typing_stop: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ChatGateway {
    pub fn new(
        api: Arc<dyn ChatApi>,
        connection: ConnectionManager,
        store: StoreHandle,
        follow_up_delay: Duration,
        typing_timeout: Duration,
    ) -> Self {
        Self {
            api,
            connection,
            store,
            follow_up_delay,
            typing_timeout,
            typing_stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Open a new session. Returns its id.
    ///
    /// The session is loaded as current shortly after creation, once the
    /// server has had time to persist the first message.
    pub async fn initiate_chat(
        &self,
        subject: &str,
        message: &str,
        priority: Priority,
    ) -> Result<String, ChatError> {
        let request = NewSession {
            subject: subject.to_string(),
            message: message.to_string(),
            priority,
        };
        let session_id = self.api.create_session(&request).await?;
        tracing::info!("Created chat session {}", session_id);

        let store = self.store.clone();
        let delay = self.follow_up_delay;
        let id = session_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            store.open_session(&id);
        });

        Ok(session_id)
    }

    /// Persist a message. It appears locally once the server pushes it back.
    pub async fn send_message(&self, session_id: &str, content: &str) -> Result<(), ChatError> {
        self.api.post_message(session_id, content).await
    }

    pub async fn accept_session(&self, session_id: &str) -> Result<(), ChatError> {
        self.api.accept_session(session_id).await?;
        self.store.refresh();
        Ok(())
    }

    pub async fn close_session(&self, session_id: &str, reason: Option<&str>) -> Result<(), ChatError> {
        self.api.close_session(session_id, reason).await?;
        self.store.refresh();
        Ok(())
    }

    /// Send a typing start/stop frame. Returns whether it went out.
    ///
    /// A start frame schedules a stop after the typing timeout unless another
    /// indicator is sent first.
    pub async fn send_typing_indicator(&self, session_id: &str, is_typing: bool) -> bool {
        self.cancel_typing_stop();
        let sent = self
            .connection
            .send(OutboundFrame::typing(session_id, is_typing))
            .await;

        // Concurrent callers may have armed a stop while we awaited.
        if let Ok(mut slot) = self.typing_stop.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
            if sent && is_typing {
                let connection = self.connection.clone();
                let id = session_id.to_string();
                let timeout = self.typing_timeout;
                *slot = Some(tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if !connection.send(OutboundFrame::typing(&id, false)).await {
                        tracing::debug!("Auto typing_stop for {} not sent", id);
                    }
                }));
            }
        }
        sent
    }

    fn cancel_typing_stop(&self) {
        if let Ok(mut slot) = self.typing_stop.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}
