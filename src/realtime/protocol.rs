//! JSON frames exchanged over the chat socket
//!
//! Every frame is a JSON object with a mandatory `type` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Message, Participant, Session};

/// Close code for a normal, intentional shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    AuthSuccess,
    AuthError {
        #[serde(default)]
        message: Option<String>,
    },
    ChatRequest {
        session: Session,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        #[serde(default)]
        session_id: Option<String>,
        message: Message,
    },
    #[serde(rename_all = "camelCase")]
    ChatAccepted {
        session_id: String,
        assigned_to: Participant,
        #[serde(default)]
        accepted_at: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    ChatClosed {
        session_id: String,
        #[serde(default)]
        closed_at: Option<DateTime<Utc>>,
        #[serde(default)]
        reason: Option<String>,
    },
    TypingStart(TypingPayload),
    TypingStop(TypingPayload),
    NewEmail,
    #[serde(other)]
    Unknown,
}

/// Who is typing where.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Deserialize)]
struct TypeOnly {
    #[serde(rename = "type")]
    kind: String,
}

/// Read only the `type` field of a frame.
pub fn frame_type(text: &str) -> Option<String> {
    serde_json::from_str::<TypeOnly>(text).ok().map(|t| t.kind)
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Authenticate {
        token: String,
    },
    #[serde(rename_all = "camelCase")]
    TypingStart {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    TypingStop {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl OutboundFrame {
    pub fn typing(session_id: &str, is_typing: bool) -> Self {
        let session_id = session_id.to_string();
        let timestamp = Utc::now();
        if is_typing {
            OutboundFrame::TypingStart {
                session_id,
                timestamp,
            }
        } else {
            OutboundFrame::TypingStop {
                session_id,
                timestamp,
            }
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail: all fields are strings or timestamps.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Authenticate { .. } => "authenticate",
            OutboundFrame::TypingStart { .. } => "typing_start",
            OutboundFrame::TypingStop { .. } => "typing_stop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticate_frame_shape() {
        let json = OutboundFrame::Authenticate {
            token: "t0k".into(),
        }
        .to_json();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "authenticate");
        assert_eq!(v["token"], "t0k");
    }

    #[test]
    fn test_typing_frame_shape() {
        let json = OutboundFrame::typing("s1", false).to_json();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "typing_stop");
        assert_eq!(v["sessionId"], "s1");
        let ts = v["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "timestamp: {}", ts);
    }

    #[test]
    fn test_parse_chat_message() {
        let text = r#"{"type":"chat_message","sessionId":"s1","message":{
            "_id":"m1","sessionId":"s1","sender":{"userId":"u1","userType":"Agency"},
            "content":"hi","createdAt":"2024-05-01T10:00:00Z"}}"#;
        match InboundFrame::parse(text).unwrap() {
            InboundFrame::ChatMessage {
                session_id,
                message,
            } => {
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert_eq!(message.id, "m1");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_parse_typing_and_accept() {
        let typing = InboundFrame::parse(
            r#"{"type":"typing_start","sessionId":"s1","userName":"Zed"}"#,
        )
        .unwrap();
        assert!(matches!(typing, InboundFrame::TypingStart(ref p) if p.user_name.as_deref() == Some("Zed")));

        let accepted = InboundFrame::parse(
            r#"{"type":"chat_accepted","sessionId":"s1","assignedTo":{"userId":"z","name":"Zed"}}"#,
        )
        .unwrap();
        assert!(matches!(accepted, InboundFrame::ChatAccepted { ref session_id, .. } if session_id == "s1"));
    }

    #[test]
    fn test_unknown_and_ignored_types() {
        assert_eq!(
            InboundFrame::parse(r#"{"type":"presence_update","user":"x"}"#).unwrap(),
            InboundFrame::Unknown
        );
        assert_eq!(
            InboundFrame::parse(r#"{"type":"new_email","subject":"x"}"#).unwrap(),
            InboundFrame::NewEmail
        );
        assert_eq!(
            InboundFrame::parse(r#"{"type":"auth_success","userId":"u"}"#).unwrap(),
            InboundFrame::AuthSuccess
        );
    }

    #[test]
    fn test_malformed_frames_fail() {
        assert!(InboundFrame::parse("not json").is_err());
        assert!(InboundFrame::parse(r#"{"sessionId":"s1"}"#).is_err());
        // Known type with missing payload
        assert!(InboundFrame::parse(r#"{"type":"chat_closed"}"#).is_err());
    }

    #[test]
    fn test_frame_type() {
        assert_eq!(frame_type(r#"{"type":"auth_error","message":"bad"}"#).as_deref(), Some("auth_error"));
        assert_eq!(frame_type("[]"), None);
    }
}
