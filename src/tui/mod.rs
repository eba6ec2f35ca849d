//! Terminal user interface for live support chat, using Ratatui.

mod app;
mod backend;
mod compose;
mod messages;
mod sidebar;
mod ui;

pub use app::run;
