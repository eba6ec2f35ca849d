//! Sidebar widget: sessions grouped by status, with unread badges.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};
use unicode_width::UnicodeWidthStr;

use crate::chat::ChatSnapshot;
use crate::models::{Priority, Session, SessionStatus};

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// Sidebar section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Group {
    Waiting,
    Active,
    Closed,
}

impl Group {
    fn of(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Waiting => Group::Waiting,
            SessionStatus::Active | SessionStatus::Transferred => Group::Active,
            SessionStatus::Closed => Group::Closed,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Group::Waiting => "WAITING",
            Group::Active => "ACTIVE",
            Group::Closed => "CLOSED",
        }
    }
}

/// One session as shown in the list.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub title: String,
    pub group: Group,
    pub priority: Priority,
    pub unread: u32,
}

impl SessionRow {
    fn from_session(session: &Session, unread: u32) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title().to_string(),
            group: Group::of(session.status),
            priority: session.priority,
            unread,
        }
    }
}

/// Sidebar state: rows derived from the latest snapshot plus navigation.
pub struct SidebarState {
    pub rows: Vec<SessionRow>,
    /// Index into the flat item list (0-based)
    pub selected: usize,
    /// Session currently open in the messages pane.
    pub open: Option<String>,
    /// True until the first listing arrives.
    pub loading: bool,
}

impl Default for SidebarState {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            selected: 0,
            open: None,
            loading: true,
        }
    }
}

impl SidebarState {
    /// Rebuild rows from a snapshot, keeping the selection on the same session.
    pub fn update(&mut self, snapshot: &ChatSnapshot, listed: bool) {
        let keep = self.selected_session_id();

        let mut rows: Vec<SessionRow> = snapshot
            .sessions
            .iter()
            .map(|s| SessionRow::from_session(s, snapshot.unread_for(&s.id)))
            .collect();
        // Stable: preserves server order within each group.
        rows.sort_by_key(|r| r.group);
        self.rows = rows;
        self.open = snapshot.current.as_ref().map(|s| s.id.clone());
        if listed {
            self.loading = false;
        }

        if let Some(id) = keep {
            if let Some(pos) = self
                .flat_items()
                .iter()
                .position(|item| matches!(item, SidebarItem::Session(i) if self.rows[*i].id == id))
            {
                self.selected = pos;
            }
        }
        self.clamp_selection();
    }

    /// Id of the session under the cursor.
    pub fn selected_session_id(&self) -> Option<String> {
        match self.flat_items().get(self.selected)? {
            SidebarItem::Session(i) => Some(self.rows[*i].id.clone()),
            SidebarItem::Header(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Flat item enumeration
// ---------------------------------------------------------------------------

/// One row in the sidebar's flat list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebarItem {
    /// Section header (not selectable, but occupies a row)
    Header(Group),
    /// Index into `SidebarState.rows`
    Session(usize),
}

impl SidebarState {
    /// Build a flat list of items in display order. Empty groups get no header.
    pub fn flat_items(&self) -> Vec<SidebarItem> {
        let mut items = Vec::new();
        let mut last_group = None;
        for (i, row) in self.rows.iter().enumerate() {
            if last_group != Some(row.group) {
                items.push(SidebarItem::Header(row.group));
                last_group = Some(row.group);
            }
            items.push(SidebarItem::Session(i));
        }
        items
    }

    pub fn move_up(&mut self) {
        let items = self.flat_items();
        let mut idx = self.selected;
        while idx > 0 {
            idx -= 1;
            if matches!(items.get(idx), Some(SidebarItem::Session(_))) {
                self.selected = idx;
                return;
            }
        }
    }

    pub fn move_down(&mut self) {
        let items = self.flat_items();
        let mut idx = self.selected;
        while idx + 1 < items.len() {
            idx += 1;
            if matches!(items.get(idx), Some(SidebarItem::Session(_))) {
                self.selected = idx;
                return;
            }
        }
    }

    /// Clamp selected index to valid range after structural changes.
    pub fn clamp_selection(&mut self) {
        let items = self.flat_items();
        if items.is_empty() {
            self.selected = 0;
            return;
        }
        if self.selected >= items.len() {
            self.selected = items.len() - 1;
        }
        if matches!(items[self.selected], SidebarItem::Header(_)) {
            // Prefer the first session below the header, else above.
            if let Some(pos) = items[self.selected..]
                .iter()
                .position(|i| matches!(i, SidebarItem::Session(_)))
            {
                self.selected += pos;
            } else {
                self.move_up();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the sidebar into the given area.
pub fn render(area: Rect, buf: &mut Buffer, state: &SidebarState, focused: bool) {
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
        .border_style(border_style)
        .title(" Sessions ");

    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    if state.rows.is_empty() {
        let text = if state.loading { " Loading..." } else { " No sessions" };
        let line = Line::from(Span::styled(text, Style::default().fg(Color::DarkGray)));
        Paragraph::new(line).render(Rect::new(inner.x, inner.y, inner.width, 1), buf);
        return;
    }

    let items = state.flat_items();
    let height = inner.height as usize;
    let scroll_offset = compute_scroll_offset(state.selected, height, items.len());

    for (row_idx, item_idx) in (scroll_offset..items.len()).take(height).enumerate() {
        let row_area = Rect::new(inner.x, inner.y + row_idx as u16, inner.width, 1);
        let selected = item_idx == state.selected;
        match items[item_idx] {
            SidebarItem::Header(group) => {
                let prefix = format!(" -- {} ", group.label());
                let dashes = (inner.width as usize).saturating_sub(prefix.len());
                let label = format!("{}{}", prefix, "-".repeat(dashes));
                let style = Style::default().fg(Color::DarkGray);
                render_row(buf, row_area, &label, "", style, style);
            }
            SidebarItem::Session(i) => {
                let row = &state.rows[i];
                let is_open = state.open.as_deref() == Some(row.id.as_str());
                let cursor = if selected { "\u{25BA}" } else { " " };
                let marker = if is_open { "*" } else { priority_marker(row.priority) };
                let label = format!("{}{} {}", cursor, marker, row.title);
                let badge = if row.unread > 0 {
                    row.unread.to_string()
                } else {
                    String::new()
                };

                let style = item_style(selected, row.unread > 0, row.group == Group::Closed);
                let bstyle = if row.unread > 0 {
                    badge_style(selected)
                } else {
                    style
                };
                render_row(buf, row_area, &label, &badge, style, bstyle);
            }
        }
    }
}

fn priority_marker(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent => "!",
        Priority::High => "+",
        Priority::Medium | Priority::Low => " ",
    }
}

/// Simple scroll offset: keep selected item visible.
fn compute_scroll_offset(selected: usize, height: usize, total: usize) -> usize {
    if total <= height || selected < height {
        return 0;
    }
    let max_offset = total.saturating_sub(height);
    selected.saturating_sub(height - 1).min(max_offset)
}

/// Style for a session row based on selection, unread and closed state.
fn item_style(selected: bool, has_unread: bool, closed: bool) -> Style {
    if selected {
        Style::default()
            .fg(Color::White)
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD)
    } else if has_unread {
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD)
    } else if closed {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Gray)
    }
}

/// Style for a badge (unread count) based on selection state.
fn badge_style(selected: bool) -> Style {
    let style = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);
    if selected {
        style.bg(Color::DarkGray)
    } else {
        style
    }
}

/// Render a row with left-aligned text and an optional right-aligned badge.
fn render_row(
    buf: &mut Buffer,
    area: Rect,
    left: &str,
    badge: &str,
    text_style: Style,
    badge_style: Style,
) {
    let width = area.width as usize;
    if width == 0 {
        return;
    }

    let badge_len = badge.width();
    let max_left = if badge_len > 0 {
        width.saturating_sub(badge_len + 1)
    } else {
        width
    };

    let mut left_truncated = String::new();
    let mut left_len = 0;
    for ch in left.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if left_len + w > max_left {
            break;
        }
        left_truncated.push(ch);
        left_len += w;
    }

    let pad = width.saturating_sub(left_len + badge_len);

    let line = Line::from(vec![
        Span::styled(left_truncated, text_style),
        Span::styled(" ".repeat(pad), text_style),
        Span::styled(badge.to_string(), badge_style),
    ]);

    Paragraph::new(line).render(Rect::new(area.x, area.y, area.width, 1), buf);
}
