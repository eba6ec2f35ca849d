//! Inbound frame dispatch
//!
//! Frames are applied strictly in delivery order. Authentication frames are
//! consumed by the connection manager and ignored here.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;

use super::notify::{self, Notice, Notifier};
use super::store::{Applied, SessionStore, StoreEvent};
use crate::realtime::protocol::{self, InboundFrame};

const PREVIEW_CHARS: usize = 60;

pub struct Router {
    viewer_id: Option<String>,
    notifier: Arc<dyn Notifier>,
}

impl Router {
    pub fn new(viewer_id: Option<String>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            viewer_id,
            notifier,
        }
    }

    /// Parse one raw frame and merge it into `store`.
    pub fn route(&self, text: &str, store: &mut SessionStore, now: Instant) -> Applied {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {} ({})", e, clip(text));
                return Applied::Ignored;
            }
        };

        let Some(event) = self.classify(frame, text) else {
            return Applied::Ignored;
        };

        let notice = self.notice_for(&event, store);
        let applied = store.apply_event(event, now);
        if applied == Applied::New {
            if let Some(notice) = notice {
                self.notifier.notify(&notice);
            }
        }
        applied
    }

    fn classify(&self, frame: InboundFrame, text: &str) -> Option<StoreEvent> {
        match frame {
            InboundFrame::AuthSuccess | InboundFrame::AuthError { .. } => None,
            InboundFrame::ChatRequest { session } => Some(StoreEvent::SessionRequested(session)),
            InboundFrame::ChatMessage {
                session_id,
                message,
            } => {
                let session_id = session_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| message.session_id.clone());
                if session_id.is_empty() {
                    tracing::warn!("Dropping chat_message {} without a session id", message.id);
                    return None;
                }
                Some(StoreEvent::MessageReceived {
                    session_id,
                    message,
                })
            }
            InboundFrame::ChatAccepted {
                session_id,
                assigned_to,
                accepted_at,
            } => Some(StoreEvent::SessionAccepted {
                session_id,
                assignee: assigned_to,
                at: accepted_at.unwrap_or_else(Utc::now),
            }),
            InboundFrame::ChatClosed {
                session_id,
                closed_at,
                reason,
            } => {
                if let Some(reason) = reason {
                    tracing::debug!("Session {} closed: {}", session_id, reason);
                }
                Some(StoreEvent::SessionClosed {
                    session_id,
                    at: closed_at.unwrap_or_else(Utc::now),
                })
            }
            InboundFrame::TypingStart(p) => Some(StoreEvent::TypingStarted {
                who: p
                    .user_name
                    .clone()
                    .or_else(|| p.user_id.clone())
                    .unwrap_or_else(|| "Someone".to_string()),
                session_id: p.session_id,
                user_id: p.user_id,
            }),
            InboundFrame::TypingStop(p) => Some(StoreEvent::TypingStopped {
                session_id: p.session_id,
            }),
            InboundFrame::NewEmail | InboundFrame::Unknown => {
                tracing::debug!(
                    "Ignoring frame type {}",
                    protocol::frame_type(text).unwrap_or_default()
                );
                None
            }
        }
    }

    fn notice_for(&self, event: &StoreEvent, store: &SessionStore) -> Option<Notice> {
        match event {
            StoreEvent::SessionRequested(session) => Some(Notice::ChatRequest {
                session_id: session.id.clone(),
                subject: session.title().to_string(),
                from: session
                    .initiated_by
                    .as_ref()
                    .map(|p| p.display_name().to_string()),
            }),
            StoreEvent::MessageReceived {
                session_id,
                message,
            } => {
                let open = store.current_id() == Some(session_id.as_str())
                    || store.opening_id() == Some(session_id.as_str());
                let own = self.viewer_id.as_deref() == Some(message.sender.user_id.as_str());
                if open || own {
                    return None;
                }
                Some(Notice::NewMessage {
                    session_id: session_id.clone(),
                    sender: message.sender.display_name().to_string(),
                    preview: notify::preview(&message.content, PREVIEW_CHARS),
                })
            }
            _ => None,
        }
    }
}

fn clip(text: &str) -> String {
    notify::preview(text, 120)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::SessionStatus;
    use crate::testing::RecordingNotifier;

    const VIEWER: &str = "me";

    fn setup() -> (Router, SessionStore, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let router = Router::new(Some(VIEWER.into()), notifier.clone());
        let store = SessionStore::new(Some(VIEWER.into()), Duration::from_secs(3));
        (router, store, notifier)
    }

    fn chat_message(session: &str, id: &str, sender: &str) -> String {
        format!(
            r#"{{"type":"chat_message","sessionId":"{session}","message":{{"_id":"{id}","sender":{{"userId":"{sender}","name":"{sender}"}},"content":"hello","createdAt":"2024-05-01T10:00:00Z"}}}}"#
        )
    }

    #[test]
    fn test_request_accept_scenario_from_raw_frames() {
        let (router, mut store, notifier) = setup();
        let now = Instant::now();
        let frames = [
            r#"{"type":"chat_request","session":{"_id":"A","status":"waiting","subject":"Leak"}}"#.to_string(),
            chat_message("A", "m1", "cust"),
            r#"{"type":"chat_accepted","sessionId":"A","assignedTo":{"userId":"Z","name":"Zed"}}"#.to_string(),
            chat_message("A", "m2", "cust"),
        ];
        for frame in &frames {
            router.route(frame, &mut store, now);
        }

        let a = store.sessions().iter().find(|s| s.id == "A").unwrap();
        assert_eq!(a.status, SessionStatus::Active);
        assert_eq!(a.assigned_to.as_ref().unwrap().display_name(), "Zed");
        assert_eq!(store.unread_for("A"), 2);
        assert_eq!(store.total_unread(), 2);
        assert_eq!(notifier.notices().len(), 3);
    }

    #[test]
    fn test_three_sessions_three_unread() {
        let (router, mut store, _) = setup();
        let now = Instant::now();
        for (i, s) in ["x", "y", "z"].iter().enumerate() {
            router.route(&chat_message(s, &format!("m{}", i), "cust"), &mut store, now);
        }
        assert_eq!(store.total_unread(), 3);
    }

    #[test]
    fn test_malformed_and_ignored_frames() {
        let (router, mut store, notifier) = setup();
        let rx = store.subscribe();
        let now = Instant::now();
        for frame in [
            "{not json",
            r#"{"type":"chat_closed"}"#,
            r#"{"type":"new_email","from":"x"}"#,
            r#"{"type":"agent_presence","online":true}"#,
            r#"{"type":"auth_success"}"#,
        ] {
            assert_eq!(router.route(frame, &mut store, now), Applied::Ignored);
        }
        assert!(!rx.has_changed().unwrap());
        assert!(notifier.notices().is_empty());
        assert!(store.sessions().is_empty());
    }

    #[test]
    fn test_no_notice_for_own_or_duplicate_message() {
        let (router, mut store, notifier) = setup();
        let now = Instant::now();
        router.route(&chat_message("a", "m1", VIEWER), &mut store, now);
        router.route(&chat_message("a", "m2", "cust"), &mut store, now);
        router.route(&chat_message("a", "m2", "cust"), &mut store, now);

        let notices = notifier.notices();
        assert_eq!(notices.len(), 1);
        assert!(matches!(&notices[0], Notice::NewMessage { sender, .. } if sender == "cust"));
        assert_eq!(store.total_unread(), 1);
    }

    #[test]
    fn test_repeated_chat_request_notifies_once() {
        let (router, mut store, notifier) = setup();
        let frame = r#"{"type":"chat_request","session":{"_id":"A","status":"waiting"}}"#;
        router.route(frame, &mut store, Instant::now());
        router.route(frame, &mut store, Instant::now());
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(notifier.notices().len(), 1);
    }

    #[test]
    fn test_message_session_id_falls_back_to_payload() {
        let (router, mut store, _) = setup();
        let frame = r#"{"type":"chat_message","message":{"_id":"m1","sessionId":"s9","sender":{"userId":"c"},"createdAt":"2024-05-01T10:00:00Z"}}"#;
        assert_eq!(router.route(frame, &mut store, Instant::now()), Applied::New);
        assert_eq!(store.unread_for("s9"), 1);
    }
}
