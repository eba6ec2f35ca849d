//! REST API client for the support chat backend

mod chat;
pub mod client;
mod error;

use anyhow::Result;

pub use chat::{format_time, ChatApi, NewSession, SessionDetail, SessionPage};
pub use client::ApiClient;
pub use error::ChatError;

use crate::models::{Priority, SessionFilter};

/// List sessions
pub async fn list_sessions(filter: SessionFilter, page: u32) -> Result<()> {
    chat::list_sessions(filter, page).await
}

/// Print a session's message history
pub async fn read_session(session_id: &str) -> Result<()> {
    chat::read_session(session_id).await
}

/// Send a message to a session
pub async fn send_message(session_id: &str, message: &str) -> Result<()> {
    chat::send_message(session_id, message).await
}

/// Open a new support session
pub async fn initiate(subject: &str, message: &str, priority: Priority) -> Result<()> {
    chat::initiate(subject, message, priority).await
}

/// Accept a waiting session
pub async fn accept(session_id: &str) -> Result<()> {
    chat::accept(session_id).await
}

/// Close a session
pub async fn close(session_id: &str, reason: Option<&str>) -> Result<()> {
    chat::close(session_id, reason).await
}
