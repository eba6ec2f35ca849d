//! User-related models

use serde::{Deserialize, Serialize};

/// Account type of a chat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Agency,
    SuperUser,
    TeamMember,
    System,
    #[serde(other)]
    Unknown,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Agency => "Agency",
            UserRole::SuperUser => "SuperUser",
            UserRole::TeamMember => "TeamMember",
            UserRole::System => "System",
            UserRole::Unknown => "Unknown",
        }
    }
}

/// Identity of a session initiator, assignee or message sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(alias = "id", alias = "_id")]
    pub user_id: String,
    #[serde(default = "default_role")]
    pub user_type: UserRole,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

fn default_role() -> UserRole {
    UserRole::Unknown
}

impl Participant {
    /// Name for display, falling back to the user id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_accepts_mongo_id() {
        let p: Participant =
            serde_json::from_str(r#"{"_id":"u1","userType":"SuperUser","name":"Zed"}"#).unwrap();
        assert_eq!(p.user_id, "u1");
        assert_eq!(p.user_type, UserRole::SuperUser);
        assert_eq!(p.display_name(), "Zed");
    }

    #[test]
    fn test_unknown_role_does_not_fail() {
        let p: Participant =
            serde_json::from_str(r#"{"userId":"u2","userType":"Contractor"}"#).unwrap();
        assert_eq!(p.user_type, UserRole::Unknown);
        assert_eq!(p.display_name(), "u2");
    }
}
