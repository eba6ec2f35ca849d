//! Compose box: single-line reply input for the open session.

use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Frame,
};
use unicode_width::UnicodeWidthChar;

/// Height of the compose box: border, input line, border.
pub const COMPOSE_HEIGHT: u16 = 3;

/// Input text and cursor for the compose box.
#[derive(Default)]
pub struct ComposeState {
    pub input: String,
    /// Cursor position in characters.
    pub cursor_pos: usize,
}

impl ComposeState {
    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_offset(self.cursor_pos);
        self.input.insert(at, c);
        self.cursor_pos += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor_pos == 0 {
            return;
        }
        let end = self.byte_offset(self.cursor_pos);
        let start = self.byte_offset(self.cursor_pos - 1);
        self.input.drain(start..end);
        self.cursor_pos -= 1;
    }

    pub fn delete(&mut self) {
        if self.cursor_pos >= self.input.chars().count() {
            return;
        }
        let start = self.byte_offset(self.cursor_pos);
        let end = self.byte_offset(self.cursor_pos + 1);
        self.input.drain(start..end);
    }

    pub fn move_left(&mut self) {
        self.cursor_pos = self.cursor_pos.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor_pos = (self.cursor_pos + 1).min(self.input.chars().count());
    }

    pub fn move_home(&mut self) {
        self.cursor_pos = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor_pos = self.input.chars().count();
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.cursor_pos = 0;
    }

    /// Take the trimmed input and clear the box. None when blank.
    pub fn submit(&mut self) -> Option<String> {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return None;
        }
        self.clear();
        Some(text)
    }

    fn byte_offset(&self, char_pos: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }
}

/// Render the compose box and place the terminal cursor when focused.
///
/// `target` is the open session's title; None disables input.
pub fn render(
    area: Rect,
    frame: &mut Frame,
    state: &ComposeState,
    target: Option<&str>,
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
    frame.render_widget(block, area);

    if inner.height == 0 || inner.width == 0 {
        return;
    }
    let input_area = Rect::new(inner.x, inner.y, inner.width, 1);

    let Some(title) = target else {
        let line = Line::from(Span::styled(
            " No open session",
            Style::default().fg(Color::DarkGray),
        ));
        frame.render_widget(Paragraph::new(line), input_area);
        return;
    };

    if state.input.is_empty() {
        let placeholder = format!(" Type a message to {}...", title);
        let line = Line::from(Span::styled(placeholder, Style::default().fg(Color::DarkGray)));
        frame.render_widget(Paragraph::new(line), input_area);
        if focused {
            frame.set_cursor_position((input_area.x + 1, input_area.y));
        }
        return;
    }

    let view = visible_window(&state.input, state.cursor_pos, inner.width as usize);
    let line = Line::from(Span::styled(
        format!(" {}", view.text),
        Style::default().fg(Color::White),
    ));
    frame.render_widget(Paragraph::new(line), input_area);
    if focused {
        frame.set_cursor_position((input_area.x + 1 + view.cursor_col as u16, input_area.y));
    }
}

struct Window {
    text: String,
    /// Cursor column within `text`.
    cursor_col: usize,
}

/// Slice of the input that fits `width` columns (one reserved for the
/// left margin) while keeping the cursor in view.
fn visible_window(input: &str, cursor_pos: usize, width: usize) -> Window {
    let avail = width.saturating_sub(1);
    let chars: Vec<(char, usize)> = input
        .chars()
        .map(|c| (c, c.width().unwrap_or(0)))
        .collect();

    // Walk back from the cursor until the window is full.
    let cursor = cursor_pos.min(chars.len());
    let mut start = cursor;
    let mut used = 0;
    while start > 0 && used + chars[start - 1].1 < avail {
        start -= 1;
        used += chars[start].1;
    }

    let mut text = String::new();
    let mut cols = 0;
    let mut cursor_col = 0;
    for (i, (c, w)) in chars.iter().enumerate().skip(start) {
        if i == cursor {
            cursor_col = cols;
        }
        if cols + w > avail {
            break;
        }
        text.push(*c);
        cols += w;
    }
    if cursor >= chars.len() {
        cursor_col = cols;
    }

    Window { text, cursor_col }
}
