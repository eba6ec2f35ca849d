//! Error type for chat REST operations
//!
//! Every variant is recoverable: callers report it and carry on. Nothing here
//! tears down the socket or the session store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Not logged in. Run 'support-chat login --token <TOKEN>' first.")]
    NotAuthenticated,

    #[error("401 Unauthorized for {0}. Token may be invalid -- run 'support-chat login'.")]
    Unauthorized(String),

    #[error("HTTP {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl ChatError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ChatError::Http { .. } => true,
            ChatError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
