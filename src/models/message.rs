//! Message-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Keyed, Participant};

/// Message content kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
    #[serde(other)]
    Other,
}

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Sent,
    Delivered,
    Failed,
    #[serde(other)]
    Unknown,
}

/// One reader of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id", alias = "messageId")]
    pub id: String,
    #[serde(default)]
    pub session_id: String,
    pub sender: Participant,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: DeliveryStatus,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
}

impl Keyed for Message {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Message {
    /// Merge a second copy of the same message.
    ///
    /// Content is immutable; only delivery state and read receipts change.
    pub fn merge_from(&mut self, other: Message) {
        if other.status != DeliveryStatus::Unknown {
            self.status = other.status;
        }
        for receipt in other.read_by {
            if !self.read_by.iter().any(|r| r.user_id == receipt.user_id) {
                self.read_by.push(receipt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_json() {
        let json = r#"{
            "_id": "m1",
            "sessionId": "s1",
            "sender": {"userId": "u1", "userType": "TeamMember", "name": "Tess"},
            "content": "Hello",
            "messageType": "text",
            "createdAt": "2024-05-01T10:00:00.123Z",
            "status": "delivered",
            "readBy": [{"userId": "u2", "readAt": "2024-05-01T10:01:00Z"}]
        }"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!(m.id, "m1");
        assert_eq!(m.session_id, "s1");
        assert_eq!(m.status, DeliveryStatus::Delivered);
        assert_eq!(m.read_by.len(), 1);
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let json = r#"{
            "id": "m2",
            "sender": {"userId": "u1"},
            "createdAt": "2024-05-01T10:00:00Z",
            "messageType": "sticker"
        }"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!(m.message_type, MessageKind::Other);
        assert_eq!(m.status, DeliveryStatus::Sent);
        assert!(m.content.is_empty());
    }

    #[test]
    fn test_merge_adds_receipts_once() {
        let base: Message = serde_json::from_str(
            r#"{"id":"m","sender":{"userId":"a"},"content":"x","createdAt":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let mut first = base.clone();
        let mut update = base.clone();
        update.content = "changed".into();
        update.status = DeliveryStatus::Delivered;
        update.read_by.push(ReadReceipt {
            user_id: "b".into(),
            read_at: base.created_at,
        });
        first.merge_from(update.clone());
        first.merge_from(update);
        assert_eq!(first.content, "x");
        assert_eq!(first.status, DeliveryStatus::Delivered);
        assert_eq!(first.read_by.len(), 1);
    }
}
