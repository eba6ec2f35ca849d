//! Chat session models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Keyed, Participant};

/// Lifecycle of a support session.
///
/// Transitions only move forward: `Waiting -> Active -> Closed` or
/// `Waiting -> Closed`. `Transferred` ranks alongside `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Transferred,
    Closed,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Waiting => 0,
            SessionStatus::Active | SessionStatus::Transferred => 1,
            SessionStatus::Closed => 2,
        }
    }

    /// Resolve a proposed status change against the current one.
    ///
    /// Returns the status the session should hold afterwards. Backward moves
    /// are refused and `Closed` is terminal.
    pub fn advance(self, proposed: SessionStatus) -> SessionStatus {
        if self == SessionStatus::Closed {
            return self;
        }
        if proposed.rank() >= self.rank() {
            proposed
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Transferred => "transferred",
            SessionStatus::Closed => "closed",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "waiting" => Ok(SessionStatus::Waiting),
            "active" => Ok(SessionStatus::Active),
            "transferred" => Ok(SessionStatus::Transferred),
            "closed" => Ok(SessionStatus::Closed),
            other => anyhow::bail!(
                "Unknown status '{}'. Use: waiting, active, transferred, closed",
                other
            ),
        }
    }
}

/// Session priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => anyhow::bail!("Unknown priority '{}'. Use: low, medium, high, urgent", other),
        }
    }
}

/// Activity counters reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

/// A support conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(alias = "_id", alias = "sessionId")]
    pub id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub initiated_by: Option<Participant>,
    #[serde(default)]
    pub assigned_to: Option<Participant>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: SessionMetadata,
    /// Unread count for the viewing user, as reported by the server.
    #[serde(default)]
    pub unread_count: u32,
}

impl Keyed for Session {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Session {
    /// Merge a newer view of the same session into this one.
    ///
    /// Status only moves forward; optional fields are overwritten only when
    /// the newer view carries a value.
    pub fn merge_from(&mut self, newer: Session) {
        self.status = self.status.advance(newer.status);
        if !newer.subject.is_empty() {
            self.subject = newer.subject;
        }
        self.priority = newer.priority;
        if newer.initiated_by.is_some() {
            self.initiated_by = newer.initiated_by;
        }
        if newer.assigned_to.is_some() {
            self.assigned_to = newer.assigned_to;
        }
        self.assigned_at = newer.assigned_at.or(self.assigned_at);
        self.created_at = newer.created_at.or(self.created_at);
        self.accepted_at = newer.accepted_at.or(self.accepted_at);
        self.closed_at = newer.closed_at.or(self.closed_at);
        self.metadata.message_count = self.metadata.message_count.max(newer.metadata.message_count);
        self.metadata.last_activity = later(self.metadata.last_activity, newer.metadata.last_activity);
        self.unread_count = newer.unread_count;
    }

    /// Mark accepted by `agent`, unless the session already closed.
    pub fn accept(&mut self, agent: Participant, at: DateTime<Utc>) {
        let next = self.status.advance(SessionStatus::Active);
        if next != SessionStatus::Active {
            tracing::debug!("Ignoring accept for {} in status {}", self.id, self.status.as_str());
            return;
        }
        self.status = next;
        self.assigned_to = Some(agent);
        self.assigned_at = Some(at);
        self.accepted_at = Some(at);
    }

    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.status == SessionStatus::Closed {
            return;
        }
        self.status = SessionStatus::Closed;
        self.closed_at = Some(at);
    }

    /// Record message activity.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.metadata.last_activity = later(self.metadata.last_activity, Some(at));
    }

    /// Display title: subject or id.
    pub fn title(&self) -> &str {
        if self.subject.trim().is_empty() {
            &self.id
        } else {
            &self.subject
        }
    }
}

fn later(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Server pagination block for session listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub pages: u32,
}

/// Listing filter for `GET /chat/sessions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub priority: Option<Priority>,
}
