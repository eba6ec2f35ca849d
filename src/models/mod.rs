//! Data models for support chat entities

mod message;
mod session;
mod user;

pub use message::*;
pub use session::*;
pub use user::*;

/// Entities that are merged into client-side lists by identifier.
pub trait Keyed {
    fn key(&self) -> &str;
}
