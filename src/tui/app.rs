//! TUI application state and main event loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::{FutureExt, StreamExt};
use ratatui::DefaultTerminal;
use std::panic::AssertUnwindSafe;
use tokio::time::Instant;

use super::backend::{Backend, BackendCommand, BackendResponse};
use super::compose::ComposeState;
use super::messages::MessagesState;
use super::sidebar::SidebarState;
use super::ui;
use crate::chat::notify::TerminalBell;
use crate::chat::{ChatClient, ChatSnapshot, StoreHandle};
use crate::config::Config;
use crate::models::SessionStatus;
use crate::realtime::ConnectionStatus;

/// Minimum gap between typing_start frames while keys are pressed.
const TYPING_THROTTLE: Duration = Duration::from_secs(2);

/// Lines moved per PageUp/PageDown in the messages pane.
const PAGE_LINES: usize = 10;

/// Active pane in the TUI
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    #[default]
    Sidebar,
    Messages,
    Compose,
}

impl Pane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pane::Sidebar => "sessions",
            Pane::Messages => "messages",
            Pane::Compose => "compose",
        }
    }

    fn next(self) -> Self {
        match self {
            Pane::Sidebar => Pane::Messages,
            Pane::Messages => Pane::Compose,
            Pane::Compose => Pane::Sidebar,
        }
    }
}

/// What a key press asks the outside world to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    Open(String),
    Refresh,
    Accept(String),
    Close(String),
    ClearCurrent,
    Send { session_id: String, text: String },
    Typing(String),
}

/// Application state
pub struct App {
    pub should_exit: bool,
    pub user_name: String,
    pub viewer_id: Option<String>,
    pub connection: ConnectionStatus,
    pub snapshot: ChatSnapshot,
    pub sidebar: SidebarState,
    pub messages: MessagesState,
    pub compose: ComposeState,
    pub active_pane: Pane,
    pub status_message: Option<String>,
    pub status_is_error: bool,
    last_typing: Option<Instant>,
}

impl App {
    pub fn new(user_name: String, viewer_id: Option<String>, connection: ConnectionStatus) -> Self {
        Self {
            should_exit: false,
            user_name,
            viewer_id,
            connection,
            snapshot: ChatSnapshot::default(),
            sidebar: SidebarState::default(),
            messages: MessagesState::default(),
            compose: ComposeState::default(),
            active_pane: Pane::default(),
            status_message: None,
            status_is_error: false,
            last_typing: None,
        }
    }

    /// Take a new store snapshot. Fresh errors go to the status bar.
    pub fn apply_snapshot(&mut self, snapshot: ChatSnapshot) {
        if snapshot.last_error.is_some() && snapshot.last_error != self.snapshot.last_error {
            self.status_message = snapshot.last_error.clone();
            self.status_is_error = true;
        }
        if snapshot.current.as_ref().map(|s| &s.id) != self.snapshot.current.as_ref().map(|s| &s.id) {
            self.messages.reset();
        }
        self.sidebar.update(&snapshot, true);
        self.snapshot = snapshot;
    }

    pub fn apply_response(&mut self, response: BackendResponse) {
        let (text, is_error) = match response {
            BackendResponse::Done(text) => (text, false),
            BackendResponse::Failed(text) => (text, true),
        };
        self.status_message = Some(text);
        self.status_is_error = is_error;
    }

    /// Open session id, else the one under the sidebar cursor.
    fn target_session(&self) -> Option<String> {
        self.snapshot
            .current
            .as_ref()
            .map(|s| s.id.clone())
            .or_else(|| self.sidebar.selected_session_id())
    }

    /// Map a key press to state changes and an action.
    pub fn handle_key(&mut self, key: KeyEvent, now: Instant) -> Action {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Action::Quit;
        }
        if key.code == KeyCode::Tab {
            self.active_pane = self.active_pane.next();
            return Action::None;
        }
        // Any key dismisses the last status message.
        self.status_message = None;

        if self.active_pane == Pane::Compose {
            return self.handle_compose_key(key, now);
        }

        match key.code {
            KeyCode::Char('q') => Action::Quit,
            KeyCode::Up | KeyCode::Char('k') => {
                match self.active_pane {
                    Pane::Messages => self.messages.scroll_up(1),
                    _ => self.sidebar.move_up(),
                }
                Action::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                match self.active_pane {
                    Pane::Messages => self.messages.scroll_down(1),
                    _ => self.sidebar.move_down(),
                }
                Action::None
            }
            KeyCode::PageUp => {
                self.messages.scroll_up(PAGE_LINES);
                Action::None
            }
            KeyCode::PageDown => {
                self.messages.scroll_down(PAGE_LINES);
                Action::None
            }
            KeyCode::Enter if self.active_pane == Pane::Sidebar => {
                match self.sidebar.selected_session_id() {
                    Some(id) => {
                        self.active_pane = Pane::Compose;
                        Action::Open(id)
                    }
                    None => Action::None,
                }
            }
            KeyCode::Char('r') => Action::Refresh,
            KeyCode::Char('a') => self.target_session().map_or(Action::None, Action::Accept),
            KeyCode::Char('c') => self.target_session().map_or(Action::None, Action::Close),
            KeyCode::Esc => Action::ClearCurrent,
            _ => Action::None,
        }
    }

    fn handle_compose_key(&mut self, key: KeyEvent, now: Instant) -> Action {
        let current = self
            .snapshot
            .current
            .as_ref()
            .filter(|s| s.status != SessionStatus::Closed)
            .map(|s| s.id.clone());
        match key.code {
            KeyCode::Esc => self.active_pane = Pane::Sidebar,
            KeyCode::Enter => {
                if let Some(session_id) = current {
                    if let Some(text) = self.compose.submit() {
                        self.last_typing = None;
                        return Action::Send { session_id, text };
                    }
                }
            }
            KeyCode::Char(c) => {
                let Some(session_id) = current else {
                    return Action::None;
                };
                self.compose.insert_char(c);
                let due = self
                    .last_typing
                    .map_or(true, |at| now.duration_since(at) >= TYPING_THROTTLE);
                if due {
                    self.last_typing = Some(now);
                    return Action::Typing(session_id);
                }
            }
            KeyCode::Backspace => self.compose.backspace(),
            KeyCode::Delete => self.compose.delete(),
            KeyCode::Left => self.compose.move_left(),
            KeyCode::Right => self.compose.move_right(),
            KeyCode::Home => self.compose.move_home(),
            KeyCode::End => self.compose.move_end(),
            _ => {}
        }
        Action::None
    }

    /// Carry out an action against the store and backend.
    fn perform(&mut self, action: Action, store: &StoreHandle, backend: &Backend) {
        match action {
            Action::None => {}
            Action::Quit => self.should_exit = true,
            Action::Open(id) => {
                store.open_session(&id);
                store.acknowledge(&id);
            }
            Action::Refresh => {
                store.refresh();
                self.status_message = Some("Refreshing...".to_string());
                self.status_is_error = false;
            }
            Action::Accept(id) => backend.send(BackendCommand::Accept(id)),
            Action::Close(id) => backend.send(BackendCommand::Close(id)),
            Action::ClearCurrent => store.clear_current(),
            Action::Send { session_id, text } => {
                backend.send(BackendCommand::SendMessage { session_id, text })
            }
            Action::Typing(id) => backend.send(BackendCommand::Typing(id)),
        }
    }
}

/// Run the TUI with panic-safe terminal restore
pub async fn run() -> Result<()> {
    let config = Config::load()?;
    if config.valid_token().is_none() {
        bail!("Not logged in. Run 'support-chat login' first.");
    }
    let client = ChatClient::start(&config, Arc::new(TerminalBell))?;

    let mut terminal = ratatui::init();
    let result = AssertUnwindSafe(run_app(&mut terminal, &client, &config))
        .catch_unwind()
        .await;
    ratatui::restore();
    client.shutdown();

    match result {
        Ok(r) => r,
        Err(e) => std::panic::resume_unwind(e),
    }
}

async fn run_app(terminal: &mut DefaultTerminal, client: &ChatClient, config: &Config) -> Result<()> {
    let user_name = config
        .user_name
        .clone()
        .or_else(|| config.user_id.clone())
        .unwrap_or_else(|| "agent".to_string());
    let mut app = App::new(user_name, config.user_id.clone(), client.connection.status());
    let mut backend = Backend::start(client.gateway.clone());

    let mut events = EventStream::new();
    let mut snapshots = client.store.subscribe();
    let mut status = client.connection.watch_status();
    let mut status_open = true;

    while !app.should_exit {
        terminal.draw(|frame| ui::render(frame, &app))?;

        tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    let action = app.handle_key(key, Instant::now());
                    app.perform(action, &client.store, &backend);
                }
                // Resize and other events just trigger a redraw.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    bail!("Chat runtime stopped");
                }
                let snapshot = snapshots.borrow_and_update().clone();
                app.apply_snapshot(snapshot);
            }
            changed = status.changed(), if status_open => match changed {
                Ok(()) => app.connection = status.borrow_and_update().clone(),
                Err(_) => status_open = false,
            },
            Some(response) = backend.recv() => app.apply_response(response),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use crate::testing::session;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn app_with_sessions() -> App {
        let mut app = App::new("me".into(), Some("me".into()), ConnectionStatus::default());
        let snapshot = ChatSnapshot {
            sessions: vec![
                session("w1", SessionStatus::Waiting),
                session("a1", SessionStatus::Active),
            ],
            ..Default::default()
        };
        app.apply_snapshot(snapshot);
        app
    }

    fn open(app: &mut App, id: &str) {
        let mut snapshot = app.snapshot.clone();
        snapshot.current = snapshot.session(id).cloned();
        app.apply_snapshot(snapshot);
    }

    #[test]
    fn test_quit_keys() {
        let mut app = app_with_sessions();
        assert_eq!(app.handle_key(key(KeyCode::Char('q')), Instant::now()), Action::Quit);

        app.active_pane = Pane::Compose;
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(app.handle_key(ctrl_c, Instant::now()), Action::Quit);
    }

    #[test]
    fn test_tab_cycles_panes() {
        let mut app = app_with_sessions();
        let now = Instant::now();
        app.handle_key(key(KeyCode::Tab), now);
        assert_eq!(app.active_pane, Pane::Messages);
        app.handle_key(key(KeyCode::Tab), now);
        assert_eq!(app.active_pane, Pane::Compose);
        app.handle_key(key(KeyCode::Tab), now);
        assert_eq!(app.active_pane, Pane::Sidebar);
    }

    #[test]
    fn test_enter_opens_selected_session() {
        let mut app = app_with_sessions();
        let now = Instant::now();
        assert_eq!(app.handle_key(key(KeyCode::Enter), now), Action::Open("w1".into()));
        assert_eq!(app.active_pane, Pane::Compose);

        app.active_pane = Pane::Sidebar;
        app.handle_key(key(KeyCode::Down), now);
        assert_eq!(app.handle_key(key(KeyCode::Enter), now), Action::Open("a1".into()));
    }

    #[test]
    fn test_accept_and_close_prefer_open_session() {
        let mut app = app_with_sessions();
        let now = Instant::now();
        assert_eq!(app.handle_key(key(KeyCode::Char('a')), now), Action::Accept("w1".into()));

        open(&mut app, "a1");
        assert_eq!(app.handle_key(key(KeyCode::Char('c')), now), Action::Close("a1".into()));
        assert_eq!(app.handle_key(key(KeyCode::Esc), now), Action::ClearCurrent);
        assert_eq!(app.handle_key(key(KeyCode::Char('r')), now), Action::Refresh);
    }

    #[test]
    fn test_compose_sends_to_open_session() {
        let mut app = app_with_sessions();
        open(&mut app, "a1");
        app.active_pane = Pane::Compose;
        let now = Instant::now();

        app.handle_key(key(KeyCode::Char('h')), now);
        app.handle_key(key(KeyCode::Char('i')), now);
        assert_eq!(
            app.handle_key(key(KeyCode::Enter), now),
            Action::Send {
                session_id: "a1".into(),
                text: "hi".into()
            }
        );
        assert!(app.compose.input.is_empty());
        // Blank input sends nothing.
        assert_eq!(app.handle_key(key(KeyCode::Enter), now), Action::None);
    }

    #[test]
    fn test_compose_without_session_ignores_input() {
        let mut app = app_with_sessions();
        app.active_pane = Pane::Compose;
        assert_eq!(app.handle_key(key(KeyCode::Char('x')), Instant::now()), Action::None);
        assert!(app.compose.input.is_empty());
    }

    #[test]
    fn test_typing_is_throttled() {
        let mut app = app_with_sessions();
        open(&mut app, "a1");
        app.active_pane = Pane::Compose;
        let t0 = Instant::now();

        assert_eq!(app.handle_key(key(KeyCode::Char('a')), t0), Action::Typing("a1".into()));
        assert_eq!(
            app.handle_key(key(KeyCode::Char('b')), t0 + Duration::from_millis(500)),
            Action::None
        );
        assert_eq!(
            app.handle_key(key(KeyCode::Char('c')), t0 + Duration::from_secs(2)),
            Action::Typing("a1".into())
        );
    }

    #[test]
    fn test_new_error_shown_once() {
        let mut app = app_with_sessions();
        let mut snapshot = app.snapshot.clone();
        snapshot.last_error = Some("boom".into());
        app.apply_snapshot(snapshot.clone());
        assert_eq!(app.status_message.as_deref(), Some("boom"));
        assert!(app.status_is_error);

        app.status_message = None;
        app.apply_snapshot(snapshot);
        assert!(app.status_message.is_none());
    }
}
