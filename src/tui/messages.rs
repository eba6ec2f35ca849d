//! Messages pane: the open session's history and typing indicator.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::api::format_time;
use crate::chat::ChatSnapshot;
use crate::models::{Message, MessageKind, Session};

/// Scroll state for the messages pane.
#[derive(Default)]
pub struct MessagesState {
    /// Lines scrolled up from the bottom (0 = follow newest).
    pub scroll_back: usize,
}

impl MessagesState {
    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_back = self.scroll_back.saturating_add(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_back = self.scroll_back.saturating_sub(lines);
    }

    pub fn reset(&mut self) {
        self.scroll_back = 0;
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the messages pane into the given area.
pub fn render(
    area: Rect,
    buf: &mut Buffer,
    snapshot: &ChatSnapshot,
    state: &MessagesState,
    viewer_id: Option<&str>,
    focused: bool,
) {
    let border_style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let border_type = if focused {
        BorderType::Double
    } else {
        BorderType::Plain
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(border_type)
        .border_style(border_style);

    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let Some(session) = snapshot.current.as_ref() else {
        let text = match snapshot.loading {
            Some(ref id) => format!(" Loading {}...", id),
            None => " Select a session and press Enter".to_string(),
        };
        let line = Line::from(Span::styled(text, Style::default().fg(Color::DarkGray)));
        Paragraph::new(line).render(Rect::new(inner.x, inner.y, inner.width, 1), buf);
        return;
    };

    // Reserve the first line for the session header.
    render_session_header(Rect::new(inner.x, inner.y, inner.width, 1), buf, session);

    // Last line is the typing indicator.
    let body_height = inner.height.saturating_sub(2) as usize;
    let typing_y = inner.y + inner.height.saturating_sub(1);
    if inner.height >= 3 {
        if let Some(ref typing) = snapshot.typing {
            let line = Line::from(Span::styled(
                format!(" {} is typing...", typing.who),
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            ));
            Paragraph::new(line).render(Rect::new(inner.x, typing_y, inner.width, 1), buf);
        }
    }

    if body_height == 0 {
        return;
    }

    let lines = build_message_lines(&snapshot.messages, inner.width as usize, viewer_id);
    let total = lines.len();
    let max_back = total.saturating_sub(body_height);
    let back = state.scroll_back.min(max_back);
    let start = total.saturating_sub(body_height + back);

    for (row, line) in lines.into_iter().skip(start).take(body_height).enumerate() {
        let y = inner.y + 1 + row as u16;
        Paragraph::new(line).render(Rect::new(inner.x, y, inner.width, 1), buf);
    }

    if back > 0 {
        let x = inner.x + inner.width.saturating_sub(1);
        let cell = &mut buf[(x, inner.y + body_height as u16)];
        cell.set_char('v');
        cell.set_style(Style::default().fg(Color::DarkGray));
    }
}

/// Render the session header line.
fn render_session_header(area: Rect, buf: &mut Buffer, session: &Session) {
    let mut text = format!(
        " {} [{}] {}",
        session.title(),
        session.status.as_str(),
        session.priority.as_str()
    );
    if let Some(ref agent) = session.assigned_to {
        text.push_str(&format!(" - {}", agent.display_name()));
    }
    let line = Line::from(Span::styled(
        text,
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    ));
    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Lay out messages as `HH:MM sender: text`, wrapped under the text column.
fn build_message_lines(
    messages: &[Message],
    width: usize,
    viewer_id: Option<&str>,
) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    for msg in messages {
        let own = viewer_id == Some(msg.sender.user_id.as_str());
        let stamp = format_time(Some(msg.created_at));
        let time = stamp.rsplit(' ').next().unwrap_or("").to_string();
        let sender = if own {
            "you".to_string()
        } else {
            msg.sender.display_name().to_string()
        };

        let sender_style = if own {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
        };
        let body_style = match msg.message_type {
            MessageKind::System => Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            _ => Style::default().fg(Color::White),
        };

        let content = match msg.message_type {
            MessageKind::Image => format!("[image] {}", msg.content),
            MessageKind::File => format!("[file] {}", msg.content),
            _ => msg.content.clone(),
        };

        let prefix = format!(" {} {}: ", time, sender);
        let indent = prefix.width();
        let wrapped = wrap_text(&content, width.saturating_sub(indent).max(10));

        for (i, chunk) in wrapped.into_iter().enumerate() {
            if i == 0 {
                lines.push(Line::from(vec![
                    Span::styled(format!(" {} ", time), Style::default().fg(Color::DarkGray)),
                    Span::styled(format!("{}: ", sender), sender_style),
                    Span::styled(chunk, body_style),
                ]));
            } else {
                lines.push(Line::from(vec![
                    Span::raw(" ".repeat(indent)),
                    Span::styled(chunk, body_style),
                ]));
            }
        }
    }

    lines
}

/// Word-wrap by display width. Newlines are kept; words wider than the
/// line are split.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 {
        return vec![];
    }
    let mut result = Vec::new();
    for line in text.lines() {
        let mut current = String::new();
        let mut current_w = 0;
        for word in line.split_whitespace() {
            let word_w = word.width();
            if current_w > 0 && current_w + 1 + word_w <= max_width {
                current.push(' ');
                current.push_str(word);
                current_w += 1 + word_w;
                continue;
            }
            if current_w > 0 {
                result.push(std::mem::take(&mut current));
                current_w = 0;
            }
            for ch in word.chars() {
                let w = ch.width().unwrap_or(0);
                if current_w + w > max_width {
                    result.push(std::mem::take(&mut current));
                    current_w = 0;
                }
                current.push(ch);
                current_w += w;
            }
        }
        result.push(current);
    }
    if result.is_empty() {
        result.push(String::new());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::message;

    #[test]
    fn test_wrap_text() {
        assert_eq!(wrap_text("hello world", 20), vec!["hello world"]);
        assert_eq!(wrap_text("hello world", 7), vec!["hello", "world"]);
        assert_eq!(wrap_text("a\nb", 10), vec!["a", "b"]);
        assert_eq!(wrap_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap_text("", 5), vec![""]);
    }

    #[test]
    fn test_wrap_wide_chars() {
        // Each CJK char is two columns wide.
        assert_eq!(wrap_text("日本語", 4), vec!["日本", "語"]);
    }

    #[test]
    fn test_own_messages_labelled() {
        let msgs = vec![message("m1", "s", "me", 1), message("m2", "s", "cust", 2)];
        let lines = build_message_lines(&msgs, 80, Some("me"));
        assert_eq!(lines.len(), 2);
        let first: String = lines[0].spans.iter().map(|s| s.content.as_ref()).collect();
        let second: String = lines[1].spans.iter().map(|s| s.content.as_ref()).collect();
        assert!(first.contains("you: message m1"));
        assert!(second.contains("cust: message m2"));
    }

    #[test]
    fn test_scroll_saturates() {
        let mut state = MessagesState::default();
        state.scroll_down(3);
        assert_eq!(state.scroll_back, 0);
        state.scroll_up(5);
        state.scroll_down(2);
        assert_eq!(state.scroll_back, 3);
        state.reset();
        assert_eq!(state.scroll_back, 0);
    }
}
