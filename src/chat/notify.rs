//! User-facing notifications for pushed chat activity

use std::io::Write;

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A customer opened a new support session.
    ChatRequest {
        session_id: String,
        subject: String,
        from: Option<String>,
    },
    /// Another user wrote in a session that is not open.
    NewMessage {
        session_id: String,
        sender: String,
        preview: String,
    },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::ChatRequest {
                session_id,
                subject,
                from,
            } => match from {
                Some(from) => write!(f, "New chat request from {}: {} [{}]", from, subject, session_id),
                None => write!(f, "New chat request: {} [{}]", subject, session_id),
            },
            Notice::NewMessage {
                session_id,
                sender,
                preview,
            } => write!(f, "{} [{}]: {}", sender, session_id, preview),
        }
    }
}

/// Side-effect sink for notices. Must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Rings the terminal bell.
pub struct TerminalBell;

impl Notifier for TerminalBell {
    fn notify(&self, notice: &Notice) {
        tracing::info!("{}", notice);
        let mut err = std::io::stderr();
        if let Err(e) = err.write_all(b"\x07").and_then(|_| err.flush()) {
            tracing::warn!("Failed to ring bell: {}", e);
        }
    }
}

/// Prints each notice on its own line (for `listen`).
pub struct PrintNotifier;

impl Notifier for PrintNotifier {
    fn notify(&self, notice: &Notice) {
        println!("* {}", notice);
    }
}

/// Shorten message content for a one-line notice.
pub fn preview(content: &str, max_chars: usize) -> String {
    let line = content.lines().next().unwrap_or("").trim();
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut out: String = line.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("héllo wörld", 6), "héllo…");
        assert_eq!(preview("first\nsecond", 20), "first");
    }

    #[test]
    fn test_notice_display() {
        let n = Notice::ChatRequest {
            session_id: "s1".into(),
            subject: "Leak".into(),
            from: Some("Acme".into()),
        };
        assert_eq!(n.to_string(), "New chat request from Acme: Leak [s1]");
    }
}
