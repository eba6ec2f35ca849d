//! UI rendering for the TUI

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
    Frame,
};
use unicode_width::UnicodeWidthStr;

use super::app::{App, Pane};
use super::compose;
use super::messages;
use super::sidebar;
use crate::models::SessionStatus;
use crate::realtime::{ConnectionState, ConnectionStatus};

/// Width of the sessions sidebar in columns.
const SIDEBAR_WIDTH: u16 = 28;

/// Symbol and color for the connection state.
fn status_indicator(status: &ConnectionStatus) -> (&'static str, Color) {
    match status.state {
        ConnectionState::Ready => ("*", Color::Green),
        ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Authenticating => {
            ("~", Color::Yellow)
        }
        _ => ("o", Color::Red),
    }
}

/// Connection summary for the status bar.
fn connection_text(status: &ConnectionStatus) -> String {
    let mut text = status.state.as_str().to_string();
    if let Some(ref reason) = status.reason {
        text.push_str(&format!(" ({})", reason));
    }
    if let Some(delay) = status.reconnect_in {
        text.push_str(&format!(
            ", retry {} in {}s",
            status.attempt,
            delay.as_secs()
        ));
    }
    text
}

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    let [header_area, main_area, status_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(header_area, frame.buffer_mut(), app);

    let [sidebar_area, content_area] =
        Layout::horizontal([Constraint::Length(SIDEBAR_WIDTH), Constraint::Fill(1)])
            .areas(main_area);

    sidebar::render(
        sidebar_area,
        frame.buffer_mut(),
        &app.sidebar,
        app.active_pane == Pane::Sidebar,
    );

    let [messages_area, compose_area] = Layout::vertical([
        Constraint::Fill(1),
        Constraint::Length(compose::COMPOSE_HEIGHT),
    ])
    .areas(content_area);

    messages::render(
        messages_area,
        frame.buffer_mut(),
        &app.snapshot,
        &app.messages,
        app.viewer_id.as_deref(),
        app.active_pane == Pane::Messages,
    );

    // Closed sessions take no replies.
    let target = app
        .snapshot
        .current
        .as_ref()
        .filter(|s| s.status != SessionStatus::Closed)
        .map(|s| s.title());
    compose::render(
        compose_area,
        frame,
        &app.compose,
        target,
        app.active_pane == Pane::Compose,
    );

    render_status(status_area, frame.buffer_mut(), app);
}

/// Render the header bar
fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let title_text = " Support Chat";
    let title = Span::styled(
        title_text,
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );

    let unread_text = format!(" {} unread ", app.snapshot.total_unread);
    let unread_style = if app.snapshot.total_unread > 0 {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };

    let (status_symbol, status_color) = status_indicator(&app.connection);
    let online_text = format!(" {} ", status_symbol);
    let user_text = format!(" {} ", app.user_name);

    let right_width = unread_text.width() + online_text.width() + user_text.width();
    let padding_width = (area.width as usize).saturating_sub(title_text.width() + right_width);

    let header_line = Line::from(vec![
        title,
        Span::raw(" ".repeat(padding_width)),
        Span::styled(unread_text, unread_style),
        Span::styled(online_text, Style::default().fg(status_color)),
        Span::styled(user_text, Style::default().fg(Color::Cyan)),
    ]);

    Paragraph::new(header_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Render the status bar
fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    if let Some(ref msg) = app.status_message {
        let style = if app.status_is_error {
            Style::default().fg(Color::Red).bg(Color::DarkGray)
        } else {
            Style::default().fg(Color::Green).bg(Color::DarkGray)
        };
        let line = Line::from(Span::styled(format!(" {} ", msg), style));
        Paragraph::new(line)
            .style(Style::default().bg(Color::DarkGray))
            .render(area, buf);
        return;
    }

    let (conn_symbol, conn_color) = status_indicator(&app.connection);
    let sep_style = Style::default().fg(Color::DarkGray);
    let hint_style = Style::default().fg(Color::Gray);

    let status_line = Line::from(vec![
        Span::styled(
            format!(" {} {} ", conn_symbol, connection_text(&app.connection)),
            Style::default().fg(conn_color),
        ),
        Span::styled(" | ", sep_style),
        Span::styled(
            format!("Tab: {} ", app.active_pane.as_str()),
            Style::default().fg(Color::Cyan),
        ),
        Span::styled(" | ", sep_style),
        Span::styled("Enter open  a accept  c close  r refresh  q quit", hint_style),
    ]);

    Paragraph::new(status_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_connection_text() {
        let mut status = ConnectionStatus::default();
        assert_eq!(connection_text(&status), "idle");

        status.state = ConnectionState::Closed;
        status.reason = Some("abnormal closure".into());
        status.attempt = 2;
        status.reconnect_in = Some(Duration::from_secs(2));
        assert_eq!(
            connection_text(&status),
            "closed (abnormal closure), retry 2 in 2s"
        );
    }

    #[test]
    fn test_status_indicator_colors() {
        let mut status = ConnectionStatus::default();
        status.state = ConnectionState::Ready;
        assert_eq!(status_indicator(&status).1, Color::Green);
        status.state = ConnectionState::Authenticating;
        assert_eq!(status_indicator(&status).1, Color::Yellow);
        status.state = ConnectionState::Closed;
        assert_eq!(status_indicator(&status).1, Color::Red);
    }
}
