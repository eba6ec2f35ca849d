//! Client-side session state
//!
//! `SessionStore` is the single mutable copy of chat state. It is owned by
//! the runtime task; everyone else reads `ChatSnapshot`s from a `watch`
//! channel that is republished after every mutation.
//!
//! Socket pushes and REST responses race freely, so every write path is an
//! idempotent merge: entities are upserted by id, session status only moves
//! forward, and message ids already applied are never counted twice.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

use super::upsert::{self, upsert_by_id};
use crate::api::{SessionDetail, SessionPage};
use crate::models::{Message, Pagination, Participant, Session, SessionStatus};

/// A pushed change, already classified by the router.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    SessionRequested(Session),
    MessageReceived {
        session_id: String,
        message: Message,
    },
    SessionAccepted {
        session_id: String,
        assignee: Participant,
        at: DateTime<Utc>,
    },
    SessionClosed {
        session_id: String,
        at: DateTime<Utc>,
    },
    TypingStarted {
        session_id: String,
        user_id: Option<String>,
        who: String,
    },
    TypingStopped {
        session_id: String,
    },
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Something new became visible (new session, first copy of a message...).
    New,
    /// Merged into existing state.
    Merged,
    /// No state change.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingIndicator {
    pub session_id: String,
    pub who: String,
}

#[derive(Debug)]
struct Typing {
    indicator: TypingIndicator,
    expires_at: Instant,
}

/// Immutable copy of store state handed to subscribers.
#[derive(Debug, Clone, Default)]
pub struct ChatSnapshot {
    pub sessions: Vec<Session>,
    pub pagination: Pagination,
    pub current: Option<Session>,
    /// Messages of `current`, ordered by creation time.
    pub messages: Vec<Message>,
    /// Per-session unread counts; zero entries are omitted.
    pub unread: HashMap<String, u32>,
    pub total_unread: u32,
    pub typing: Option<TypingIndicator>,
    /// Session whose history is being fetched.
    pub loading: Option<String>,
    pub last_error: Option<String>,
}

impl ChatSnapshot {
    pub fn unread_for(&self, session_id: &str) -> u32 {
        self.unread.get(session_id).copied().unwrap_or(0)
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }
}

pub struct SessionStore {
    viewer_id: Option<String>,
    typing_timeout: Duration,
    sessions: Vec<Session>,
    pagination: Pagination,
    current: Option<Session>,
    messages: Vec<Message>,
    unread: HashMap<String, u32>,
    total_unread: u32,
    typing: Option<Typing>,
    /// Applied message ids and their session; dropped once the session closes.
    seen: HashMap<String, String>,
    /// Most recently requested `load_session` still in flight.
    opening: Option<String>,
    /// Pushes for `opening` received before its fetch completed.
    buffered: Vec<Message>,
    last_error: Option<String>,
    snapshot_tx: watch::Sender<ChatSnapshot>,
}

impl SessionStore {
    pub fn new(viewer_id: Option<String>, typing_timeout: Duration) -> Self {
        let (snapshot_tx, _) = watch::channel(ChatSnapshot::default());
        Self {
            viewer_id,
            typing_timeout,
            sessions: Vec::new(),
            pagination: Pagination::default(),
            current: None,
            messages: Vec::new(),
            unread: HashMap::new(),
            total_unread: 0,
            typing: None,
            seen: HashMap::new(),
            opening: None,
            buffered: Vec::new(),
            last_error: None,
            snapshot_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.id.as_str())
    }

    pub fn opening_id(&self) -> Option<&str> {
        self.opening.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn total_unread(&self) -> u32 {
        self.total_unread
    }

    pub fn unread_for(&self, session_id: &str) -> u32 {
        self.unread.get(session_id).copied().unwrap_or(0)
    }

    pub fn typing(&self) -> Option<&TypingIndicator> {
        self.typing.as_ref().map(|t| &t.indicator)
    }

    /// When the typing indicator lapses, if one is shown.
    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.as_ref().map(|t| t.expires_at)
    }

    pub fn is_viewer(&self, user_id: &str) -> bool {
        self.viewer_id.as_deref() == Some(user_id)
    }

    // -- REST results --

    /// Replace the session list with a fetched page.
    ///
    /// Unread counts are taken from the server, except for the open session.
    /// Status never regresses below what this client already knows.
    pub fn replace_sessions(&mut self, page: SessionPage) {
        let previous = std::mem::take(&mut self.sessions);
        let mut sessions: Vec<Session> = page
            .sessions
            .into_iter()
            .map(|fresh| match previous.iter().find(|old| old.id == fresh.id) {
                Some(old) => {
                    let mut merged = old.clone();
                    merged.merge_from(fresh);
                    merged
                }
                None => fresh,
            })
            .collect();

        if let Some(current) = self.current.as_mut() {
            if let Some(listed) = sessions.iter_mut().find(|s| s.id == current.id) {
                current.merge_from(listed.clone());
                *listed = current.clone();
            }
        }

        let finished: HashSet<&str> = sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Closed)
            .map(|s| s.id.as_str())
            .filter(|id| self.current_id() != Some(*id) && self.opening.as_deref() != Some(*id))
            .collect();
        self.seen.retain(|_, session_id| !finished.contains(session_id.as_str()));

        self.unread = sessions
            .iter()
            .filter(|s| s.unread_count > 0)
            .map(|s| (s.id.clone(), s.unread_count))
            .collect();
        tracing::debug!(
            "Loaded {} sessions (page {}/{})",
            sessions.len(),
            page.pagination.page,
            page.pagination.pages
        );
        self.sessions = sessions;
        self.pagination = page.pagination;
        self.last_error = None;
        self.publish();
    }

    /// Mark `session_id` as being opened. Pushes for it are buffered until
    /// `finish_load` runs.
    pub fn begin_load(&mut self, session_id: &str) {
        if self.opening.as_deref() != Some(session_id) {
            self.abandon_opening();
        }
        self.opening = Some(session_id.to_string());
        self.publish();
    }

    /// Apply a fetched session as the current one.
    ///
    /// Returns `false` when the response is stale: another session was
    /// requested after this one, or the load was cancelled.
    pub fn finish_load(&mut self, session_id: &str, result: Result<SessionDetail, String>) -> bool {
        if self.opening.as_deref() != Some(session_id) {
            tracing::debug!("Discarding stale load of session {}", session_id);
            return false;
        }

        let detail = match result {
            Ok(detail) => detail,
            Err(message) => {
                tracing::warn!("Failed to load session {}: {}", session_id, message);
                self.abandon_opening();
                self.last_error = Some(message);
                self.publish();
                return false;
            }
        };
        self.opening = None;
        let buffered = std::mem::take(&mut self.buffered);

        let mut session = detail.session;
        let known = self
            .sessions
            .iter()
            .find(|s| s.id == session.id)
            .or(self.current.as_ref().filter(|c| c.id == session.id));
        if let Some(known) = known {
            let mut merged = known.clone();
            merged.merge_from(session);
            session = merged;
        }
        upsert_by_id(
            &mut self.sessions,
            session.clone(),
            |old, new| *old = new,
            upsert::at_front,
        );

        let mut messages = Vec::with_capacity(detail.messages.len() + buffered.len());
        for message in detail.messages.into_iter().chain(buffered) {
            self.seen.insert(message.id.clone(), session.id.clone());
            upsert_by_id(&mut messages, message, |m, n| m.merge_from(n), upsert::by_created_at);
        }

        if self
            .typing
            .as_ref()
            .is_some_and(|t| t.indicator.session_id != session.id)
        {
            self.typing = None;
        }
        self.unread.remove(&session.id);
        self.current = Some(session);
        self.messages = messages;
        self.last_error = None;
        self.publish();
        true
    }

    pub fn record_error(&mut self, message: String) {
        self.last_error = Some(message);
        self.publish();
    }

    // -- Pushed events --

    /// Merge one pushed event. Never fails; replays are harmless.
    pub fn apply_event(&mut self, event: StoreEvent, now: Instant) -> Applied {
        let applied = match event {
            StoreEvent::SessionRequested(session) => self.session_requested(session),
            StoreEvent::MessageReceived {
                session_id,
                message,
            } => self.message_received(session_id, message),
            StoreEvent::SessionAccepted {
                session_id,
                assignee,
                at,
            } => {
                if self.update_session(&session_id, |s| s.accept(assignee.clone(), at)) {
                    Applied::Merged
                } else {
                    tracing::debug!("chat_accepted for unknown session {}", session_id);
                    Applied::Ignored
                }
            }
            StoreEvent::SessionClosed { session_id, at } => {
                if self
                    .typing
                    .as_ref()
                    .is_some_and(|t| t.indicator.session_id == session_id)
                {
                    self.typing = None;
                }
                if self.update_session(&session_id, |s| s.close(at)) {
                    Applied::Merged
                } else {
                    tracing::debug!("chat_closed for unknown session {}", session_id);
                    Applied::Ignored
                }
            }
            StoreEvent::TypingStarted {
                session_id,
                user_id,
                who,
            } => {
                let own = user_id.as_deref().is_some_and(|u| self.is_viewer(u));
                if own || self.current_id() != Some(session_id.as_str()) {
                    Applied::Ignored
                } else {
                    self.typing = Some(Typing {
                        indicator: TypingIndicator { session_id, who },
                        expires_at: now + self.typing_timeout,
                    });
                    Applied::Merged
                }
            }
            StoreEvent::TypingStopped { session_id } => {
                if self
                    .typing
                    .as_ref()
                    .is_some_and(|t| t.indicator.session_id == session_id)
                {
                    self.typing = None;
                    Applied::Merged
                } else {
                    Applied::Ignored
                }
            }
        };

        if applied != Applied::Ignored {
            self.publish();
        }
        applied
    }

    fn session_requested(&mut self, session: Session) -> Applied {
        let id = session.id.clone();
        let result = upsert_by_id(
            &mut self.sessions,
            session,
            |old, new| old.merge_from(new),
            upsert::at_front,
        );
        if let upsert::Upsert::Updated(idx) = result {
            let listed = self.sessions[idx].clone();
            if let Some(current) = self.current.as_mut().filter(|c| c.id == id) {
                current.merge_from(listed);
            }
            return Applied::Merged;
        }
        tracing::info!("New chat request {}", id);
        Applied::New
    }

    fn message_received(&mut self, session_id: String, mut message: Message) -> Applied {
        if message.session_id.is_empty() {
            message.session_id = session_id.clone();
        }
        let first_copy = self
            .seen
            .insert(message.id.clone(), session_id.clone())
            .is_none();
        let at = message.created_at;
        let reloading = self.current_id() == Some(session_id.as_str());

        if self.opening.as_deref() == Some(session_id.as_str()) {
            match self.buffered.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => existing.merge_from(message.clone()),
                None if first_copy => self.buffered.push(message.clone()),
                None if !reloading => return Applied::Ignored,
                None => {}
            }
            // A reload of the open session keeps showing pushes meanwhile.
            if !reloading {
                self.update_session(&session_id, |s| s.touch(at));
                return if first_copy { Applied::New } else { Applied::Merged };
            }
        }

        if self.current_id() == Some(session_id.as_str()) {
            let result = upsert_by_id(
                &mut self.messages,
                message,
                |m, n| m.merge_from(n),
                upsert::by_created_at,
            );
            if result.is_insert() {
                self.update_session(&session_id, |s| {
                    s.metadata.message_count += 1;
                    s.touch(at);
                });
                return Applied::New;
            }
            return Applied::Merged;
        }

        if !first_copy {
            tracing::debug!("Duplicate message {} for session {}", message.id, session_id);
            return Applied::Ignored;
        }
        if !self.is_viewer(&message.sender.user_id) {
            *self.unread.entry(session_id.clone()).or_insert(0) += 1;
        }
        self.update_session(&session_id, |s| s.touch(at));
        Applied::New
    }

    // -- Local actions --

    /// Zero one session's unread counter.
    pub fn acknowledge(&mut self, session_id: &str) {
        if self.unread.remove(session_id).is_some() {
            self.publish();
        }
    }

    /// Detach the current session, its messages and typing state.
    pub fn clear_current(&mut self) {
        self.current = None;
        self.abandon_opening();
        self.messages.clear();
        self.typing = None;
        self.publish();
    }

    /// Drop the typing indicator once its deadline passed. Returns whether
    /// it was cleared.
    pub fn expire_typing(&mut self, now: Instant) -> bool {
        match self.typing {
            Some(ref t) if t.expires_at <= now => {
                self.typing = None;
                self.publish();
                true
            }
            _ => false,
        }
    }

    // -- Internals --

    /// Cancel an in-flight load; buffered pushes become unread.
    fn abandon_opening(&mut self) {
        let Some(id) = self.opening.take() else {
            return;
        };
        let unseen = std::mem::take(&mut self.buffered)
            .into_iter()
            .filter(|m| !self.is_viewer(&m.sender.user_id))
            .count() as u32;
        if unseen > 0 && self.current_id() != Some(id.as_str()) {
            *self.unread.entry(id).or_insert(0) += unseen;
        }
    }

    /// Apply `f` to both the listed and the current copy of a session.
    fn update_session(&mut self, session_id: &str, mut f: impl FnMut(&mut Session)) -> bool {
        let mut found = false;
        if let Some(listed) = self.sessions.iter_mut().find(|s| s.id == session_id) {
            f(listed);
            found = true;
        }
        if let Some(current) = self.current.as_mut().filter(|c| c.id == session_id) {
            f(current);
            found = true;
        }
        found
    }

    /// Re-derive unread totals. The open session never counts as unread.
    fn recount(&mut self) {
        if let Some(current) = self.current.as_ref() {
            self.unread.remove(&current.id);
        }
        self.unread.retain(|_, n| *n > 0);
        self.total_unread = self.unread.values().sum();
        for session in &mut self.sessions {
            session.unread_count = self.unread.get(&session.id).copied().unwrap_or(0);
        }
        if let Some(current) = self.current.as_mut() {
            current.unread_count = 0;
        }
    }

    fn publish(&mut self) {
        self.recount();
        self.snapshot_tx.send_replace(ChatSnapshot {
            sessions: self.sessions.clone(),
            pagination: self.pagination.clone(),
            current: self.current.clone(),
            messages: self.messages.clone(),
            unread: self.unread.clone(),
            total_unread: self.total_unread,
            typing: self.typing().cloned(),
            loading: self.opening.clone(),
            last_error: self.last_error.clone(),
        });
    }
}
