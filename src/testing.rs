//! Fakes and fixtures shared by unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api::{ChatApi, ChatError, NewSession, SessionDetail, SessionPage};
use crate::chat::{Notice, Notifier};
use crate::models::{
    DeliveryStatus, Message, MessageKind, Pagination, Participant, Priority, Session,
    SessionFilter, SessionMetadata, SessionStatus, UserRole,
};
use crate::realtime::transport::{Connector, SocketEvent, Transport};

// -- Fixtures --

pub fn participant(id: &str, name: &str) -> Participant {
    Participant {
        user_id: id.to_string(),
        user_type: UserRole::SuperUser,
        name: Some(name.to_string()),
        email: None,
    }
}

pub fn session(id: &str, status: SessionStatus) -> Session {
    Session {
        id: id.to_string(),
        status,
        subject: format!("subject {}", id),
        priority: Priority::Medium,
        initiated_by: None,
        assigned_to: None,
        assigned_at: None,
        created_at: None,
        accepted_at: None,
        closed_at: None,
        metadata: SessionMetadata::default(),
        unread_count: 0,
    }
}

/// A text message created `secs` seconds after a fixed epoch.
pub fn message(id: &str, session_id: &str, sender: &str, secs: i64) -> Message {
    Message {
        id: id.to_string(),
        session_id: session_id.to_string(),
        sender: Participant {
            user_id: sender.to_string(),
            user_type: UserRole::Agency,
            name: None,
            email: None,
        },
        content: format!("message {}", id),
        message_type: MessageKind::Text,
        created_at: Utc.timestamp_opt(1_714_557_600 + secs, 0).unwrap(),
        status: DeliveryStatus::Sent,
        read_by: Vec::new(),
    }
}

// -- Notifier --

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

// -- Socket --

/// Test-side controls for one scripted socket.
pub struct FakeSocketHandle {
    inbound: mpsc::UnboundedSender<SocketEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<u16>>>,
}

impl FakeSocketHandle {
    pub fn push_text(&self, text: &str) {
        let _ = self.inbound.send(SocketEvent::Text(text.to_string()));
    }

    pub fn push_close(&self, code: Option<u16>) {
        let _ = self.inbound.send(SocketEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Abnormal closure (1006).
    pub fn drop_connection(&self) {
        self.push_close(Some(1006));
    }

    /// Every frame the client wrote, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closed_with(&self) -> Option<u16> {
        *self.closed.lock().unwrap()
    }
}

struct FakeSocket {
    inbound: mpsc::UnboundedReceiver<SocketEvent>,
    // Keeps `recv` pending instead of ending when the test drops its handle.
    _keepalive: mpsc::UnboundedSender<SocketEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<u16>>>,
}

#[async_trait]
impl Transport for FakeSocket {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed.lock().unwrap().is_some() {
            bail!("socket closed");
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Result<SocketEvent> {
        match self.inbound.recv().await {
            Some(event) => Ok(event),
            None => Ok(SocketEvent::Closed {
                code: None,
                reason: "stream ended".into(),
            }),
        }
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        *self.closed.lock().unwrap() = Some(code);
        Ok(())
    }
}

/// Hands out queued sockets; fails when the queue is empty.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Option<FakeSocket>>>,
    connects: Mutex<Vec<Instant>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            connects: Mutex::new(Vec::new()),
        }
    }

    pub fn push_socket(&self) -> FakeSocketHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(None));
        self.script.lock().unwrap().push_back(Some(FakeSocket {
            inbound: rx,
            _keepalive: tx.clone(),
            sent: sent.clone(),
            closed: closed.clone(),
        }));
        FakeSocketHandle {
            inbound: tx,
            sent,
            closed,
        }
    }

    /// Queue `n` failed connection attempts.
    pub fn fail_next(&self, n: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..n {
            script.push_back(None);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>> {
        self.connects.lock().unwrap().push(Instant::now());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Some(socket)) => Ok(Box::new(socket)),
            _ => bail!("connection refused"),
        }
    }
}

// -- REST --

/// In-memory `ChatApi` recording each call as `"op"` or `"op:id"`.
#[derive(Default)]
pub struct FakeChatApi {
    sessions: Mutex<Vec<Session>>,
    details: Mutex<HashMap<String, SessionDetail>>,
    created_id: Mutex<String>,
    calls: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl FakeChatApi {
    pub fn set_sessions(&self, sessions: Vec<Session>) {
        *self.sessions.lock().unwrap() = sessions;
    }

    pub fn set_detail(&self, session: Session, messages: Vec<Message>) {
        self.details
            .lock()
            .unwrap()
            .insert(session.id.clone(), SessionDetail { session, messages });
    }

    pub fn set_created_id(&self, id: &str) {
        *self.created_id.lock().unwrap() = id.to_string();
    }

    pub fn fail_requests(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: String) -> Result<(), ChatError> {
        self.calls.lock().unwrap().push(call.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChatError::Status {
                status: 500,
                url: format!("fake://{}", call),
                body: "boom".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn create_session(&self, _request: &NewSession) -> Result<String, ChatError> {
        self.record("create".into())?;
        Ok(self.created_id.lock().unwrap().clone())
    }

    async fn list_sessions(&self, _filter: &SessionFilter, page: u32) -> Result<SessionPage, ChatError> {
        self.record("list".into())?;
        let sessions = self.sessions.lock().unwrap().clone();
        let total = sessions.len() as u32;
        Ok(SessionPage {
            sessions,
            pagination: Pagination {
                page,
                limit: 20,
                total,
                pages: 1,
            },
        })
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionDetail, ChatError> {
        self.record(format!("get:{}", session_id))?;
        self.details
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ChatError::Status {
                status: 404,
                url: format!("fake://get:{}", session_id),
                body: "not found".into(),
            })
    }

    async fn post_message(&self, session_id: &str, _content: &str) -> Result<(), ChatError> {
        self.record(format!("post:{}", session_id))
    }

    async fn accept_session(&self, session_id: &str) -> Result<(), ChatError> {
        self.record(format!("accept:{}", session_id))
    }

    async fn close_session(&self, session_id: &str, _reason: Option<&str>) -> Result<(), ChatError> {
        self.record(format!("close:{}", session_id))
    }
}
