//! Credential handling for the chat backend
//!
//! The chat service accepts an opaque token issued by the dashboard login.
//! This module only stores, clears and reports it; obtaining one is out of
//! scope.

pub mod credentials;
pub mod tokens;

pub use credentials::{login, logout, status};
pub use tokens::{StoredToken, TokenStore};
