//! Chat session REST API
//!
//! Sessions are created, listed, fetched, accepted and closed over REST.
//! Message and status changes triggered here are confirmed by socket pushes,
//! so nothing in this module touches client-side state.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::Deserialize;

use super::client::ApiClient;
use super::ChatError;
use crate::config::Config;
use crate::models::{Message, Pagination, Priority, Session, SessionFilter};

// -- Response types --

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSession {
    #[serde(alias = "_id", alias = "id")]
    session_id: String,
}

/// One page of the session listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPage {
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// A session together with its message history.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDetail {
    pub session: Session,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Request body for creating a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub subject: String,
    pub message: String,
    pub priority: Priority,
}

/// REST operations the chat core depends on.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// Create a session; returns its id.
    async fn create_session(&self, request: &NewSession) -> Result<String, ChatError>;
    async fn list_sessions(&self, filter: &SessionFilter, page: u32) -> Result<SessionPage, ChatError>;
    async fn get_session(&self, session_id: &str) -> Result<SessionDetail, ChatError>;
    async fn post_message(&self, session_id: &str, content: &str) -> Result<(), ChatError>;
    async fn accept_session(&self, session_id: &str) -> Result<(), ChatError>;
    async fn close_session(&self, session_id: &str, reason: Option<&str>) -> Result<(), ChatError>;
}

/// Percent-encode a path segment.
fn segment(id: &str) -> String {
    let Ok(mut url) = url::Url::parse("http://localhost/") else {
        return String::new();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(id);
    }
    url.path().strip_prefix('/').unwrap_or_default().to_string()
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn create_session(&self, request: &NewSession) -> Result<String, ChatError> {
        let body = serde_json::json!({
            "subject": request.subject,
            "message": request.message,
            "priority": request.priority.as_str(),
        });
        let created: Envelope<CreatedSession> = self.post_json("/chat/sessions", &body).await?;
        Ok(created.data.session_id)
    }

    async fn list_sessions(&self, filter: &SessionFilter, page: u32) -> Result<SessionPage, ChatError> {
        let mut query = vec![
            ("page", page.max(1).to_string()),
            ("limit", self.page_size().to_string()),
        ];
        if let Some(status) = filter.status {
            query.push(("status", status.as_str().to_string()));
        }
        if let Some(priority) = filter.priority {
            query.push(("priority", priority.as_str().to_string()));
        }
        let page: Envelope<SessionPage> = self.get_json("/chat/sessions", &query).await?;
        Ok(page.data)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionDetail, ChatError> {
        let path = format!("/chat/sessions/{}", segment(session_id));
        let detail: Envelope<SessionDetail> = self.get_json(&path, &[]).await?;
        Ok(detail.data)
    }

    async fn post_message(&self, session_id: &str, content: &str) -> Result<(), ChatError> {
        let path = format!("/chat/sessions/{}/messages", segment(session_id));
        let body = serde_json::json!({ "content": content, "messageType": "text" });
        self.send_json(reqwest::Method::POST, &path, &body).await?;
        Ok(())
    }

    async fn accept_session(&self, session_id: &str) -> Result<(), ChatError> {
        let path = format!("/chat/sessions/{}/accept", segment(session_id));
        self.send_json(reqwest::Method::PUT, &path, &serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn close_session(&self, session_id: &str, reason: Option<&str>) -> Result<(), ChatError> {
        let path = format!("/chat/sessions/{}/close", segment(session_id));
        let body = match reason {
            Some(reason) => serde_json::json!({ "reason": reason }),
            None => serde_json::json!({}),
        };
        self.send_json(reqwest::Method::PUT, &path, &body).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CLI commands (print to stdout)
// ---------------------------------------------------------------------------

fn client() -> Result<ApiClient> {
    let config = Config::load().context("Failed to load config")?;
    Ok(ApiClient::new(&config)?)
}

/// Short local timestamp for listings.
pub fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// List sessions (prints to stdout).
pub async fn list_sessions(filter: SessionFilter, page: u32) -> Result<()> {
    let client = client()?;
    let result = client.list_sessions(&filter, page).await?;

    println!("\nChat Sessions:");
    println!("{:-<60}", "");

    if result.sessions.is_empty() {
        println!("  (no sessions found)");
        return Ok(());
    }

    for session in &result.sessions {
        let unread = if session.unread_count > 0 {
            format!(" ({} unread)", session.unread_count)
        } else {
            String::new()
        };
        println!("{}{}", session.title(), unread);
        println!("  ID: {}", session.id);
        println!(
            "  Status: {}  Priority: {}",
            session.status.as_str(),
            session.priority.as_str()
        );
        if let Some(ref from) = session.initiated_by {
            println!("  From: {} ({})", from.display_name(), from.user_type.as_str());
        }
        if let Some(ref agent) = session.assigned_to {
            println!("  Agent: {}", agent.display_name());
        }
        println!("  Last: {}", format_time(session.metadata.last_activity.or(session.created_at)));
        println!();
    }

    let p = &result.pagination;
    if p.pages > 1 {
        println!("Page {} of {} ({} sessions)", p.page, p.pages, p.total);
    }

    Ok(())
}

/// Print one session's messages.
pub async fn read_session(session_id: &str) -> Result<()> {
    let client = client()?;
    let detail = client.get_session(session_id).await?;

    println!(
        "{} [{}]",
        detail.session.title(),
        detail.session.status.as_str()
    );

    if detail.messages.is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    for msg in &detail.messages {
        println!(
            "[{}] {}: {}",
            format_time(Some(msg.created_at)),
            msg.sender.display_name(),
            msg.content.trim()
        );
    }

    Ok(())
}

pub async fn send_message(session_id: &str, message: &str) -> Result<()> {
    client()?.post_message(session_id, message).await?;
    println!("Message sent.");
    Ok(())
}

pub async fn initiate(subject: &str, message: &str, priority: Priority) -> Result<()> {
    let request = NewSession {
        subject: subject.to_string(),
        message: message.to_string(),
        priority,
    };
    let id = client()?.create_session(&request).await?;
    println!("Session created: {}", id);
    Ok(())
}

pub async fn accept(session_id: &str) -> Result<()> {
    client()?.accept_session(session_id).await?;
    println!("Session accepted.");
    Ok(())
}

pub async fn close(session_id: &str, reason: Option<&str>) -> Result<()> {
    client()?.close_session(session_id, reason).await?;
    println!("Session closed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_list_envelope() {
        let json = r#"{"data":{"sessions":[{"_id":"s1","status":"active","subject":"Boiler"}],
            "pagination":{"page":1,"limit":20,"total":1,"pages":1}}}"#;
        let env: Envelope<SessionPage> = serde_json::from_str(json).unwrap();
        assert_eq!(env.data.sessions.len(), 1);
        assert_eq!(env.data.pagination.total, 1);
    }

    #[test]
    fn test_parse_created_session() {
        let env: Envelope<CreatedSession> =
            serde_json::from_str(r#"{"success":true,"data":{"sessionId":"abc"}}"#).unwrap();
        assert_eq!(env.data.session_id, "abc");
    }

    #[test]
    fn test_parse_detail_without_messages() {
        let env: Envelope<SessionDetail> =
            serde_json::from_str(r#"{"data":{"session":{"id":"s","status":"waiting"}}}"#).unwrap();
        assert!(env.data.messages.is_empty());
    }

    #[test]
    fn test_segment_encodes_reserved_chars() {
        assert_eq!(segment("a/b c"), "a%2Fb%20c");
        assert_eq!(segment("a+b?c#d"), "a+b%3Fc%23d");
        assert_eq!(segment("64f1c2"), "64f1c2");
    }
}
