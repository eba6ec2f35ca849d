//! Token storage and management

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds before expiry at which a token is treated as expired.
const EXPIRY_MARGIN_SECS: u64 = 60;

/// Stored access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    pub expires_at: Option<u64>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl StoredToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs.map(|secs| unix_now() + secs);
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => unix_now() + EXPIRY_MARGIN_SECS >= exp,
            None => false,
        }
    }
}

/// Token store trait for different storage backends
pub trait TokenStore {
    fn get_auth_token(&self) -> Option<StoredToken>;
    fn set_auth_token(&mut self, token: String, expires_in: Option<u64>);
    fn clear_tokens(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_without_expiry_never_expires() {
        let token = StoredToken::new("abc".into(), None);
        assert!(!token.is_expired());
    }

    #[test]
    fn test_token_inside_margin_is_expired() {
        let token = StoredToken::new("abc".into(), Some(EXPIRY_MARGIN_SECS / 2));
        assert!(token.is_expired());
        let token = StoredToken::new("abc".into(), Some(3600));
        assert!(!token.is_expired());
    }
}
