//! Task that owns the session store
//!
//! All store mutations happen on this one task: pushed frames, UI commands,
//! completed REST fetches, the periodic refresh and typing expiry are
//! multiplexed with `select!`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use super::notify::Notifier;
use super::router::Router;
use super::store::{ChatSnapshot, SessionStore};
use crate::api::{ChatApi, ChatError, SessionDetail, SessionPage};
use crate::models::SessionFilter;
use crate::realtime::{ConnectionManager, ConnectionStatus, ReceivedFrame};

/// Requests the UI and gateway make of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    LoadSessions { filter: SessionFilter, page: u32 },
    /// Re-run the last session listing.
    Refresh,
    LoadSession(String),
    ClearCurrent,
    Acknowledge(String),
}

/// Cloneable access to the running store.
#[derive(Clone)]
pub struct StoreHandle {
    commands: mpsc::UnboundedSender<StoreCommand>,
    snapshot: watch::Receiver<ChatSnapshot>,
}

impl StoreHandle {
    pub fn load_sessions(&self, filter: SessionFilter, page: u32) {
        self.send(StoreCommand::LoadSessions { filter, page });
    }

    pub fn refresh(&self) {
        self.send(StoreCommand::Refresh);
    }

    /// Fetch a session and make it current.
    pub fn open_session(&self, session_id: &str) {
        self.send(StoreCommand::LoadSession(session_id.to_string()));
    }

    pub fn clear_current(&self) {
        self.send(StoreCommand::ClearCurrent);
    }

    pub fn acknowledge(&self, session_id: &str) {
        self.send(StoreCommand::Acknowledge(session_id.to_string()));
    }

    /// Latest published state.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.clone()
    }

    fn send(&self, cmd: StoreCommand) {
        if self.commands.send(cmd).is_err() {
            tracing::warn!("Chat runtime stopped -- command dropped");
        }
    }
}

enum Fetched {
    Sessions {
        request: u64,
        result: Result<SessionPage, ChatError>,
    },
    Session {
        id: String,
        result: Result<SessionDetail, ChatError>,
    },
}

pub struct ChatRuntime {
    api: Arc<dyn ChatApi>,
    store: SessionStore,
    router: Router,
    frames: broadcast::Receiver<ReceivedFrame>,
    status: watch::Receiver<ConnectionStatus>,
    commands: mpsc::UnboundedReceiver<StoreCommand>,
    fetched_tx: mpsc::UnboundedSender<Fetched>,
    fetched_rx: mpsc::UnboundedReceiver<Fetched>,
    refresh_every: Duration,
    filter: SessionFilter,
    page: u32,
    /// Id of the newest listing request; older responses are dropped.
    list_request: u64,
}

impl ChatRuntime {
    /// Start the runtime on the connection's frame stream.
    ///
    /// The session list is loaded immediately and then every
    /// `refresh_every`. The task stops once every `StoreHandle` is dropped.
    pub fn spawn(
        api: Arc<dyn ChatApi>,
        connection: &ConnectionManager,
        viewer_id: Option<String>,
        typing_timeout: Duration,
        refresh_every: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> StoreHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (fetched_tx, fetched_rx) = mpsc::unbounded_channel();
        let store = SessionStore::new(viewer_id.clone(), typing_timeout);
        let snapshot = store.subscribe();

        let runtime = ChatRuntime {
            api,
            store,
            router: Router::new(viewer_id, notifier),
            frames: connection.subscribe_frames(),
            status: connection.watch_status(),
            commands: cmd_rx,
            fetched_tx,
            fetched_rx,
            refresh_every,
            filter: SessionFilter::default(),
            page: 1,
            list_request: 0,
        };
        tokio::spawn(runtime.run());

        StoreHandle {
            commands: cmd_tx,
            snapshot,
        }
    }

    async fn run(mut self) {
        let mut refresh = time::interval(self.refresh_every);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames_open = true;
        let mut status_open = true;
        let mut seen_epoch = self.status.borrow().epoch;

        loop {
            let typing_deadline = self.store.typing_deadline();

            tokio::select! {
                frame = self.frames.recv(), if frames_open => match frame {
                    Ok(frame) => {
                        self.router.route(&frame.text, &mut self.store, Instant::now());
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Missed {} chat frames, resynchronising", missed);
                        self.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Frame stream closed");
                        frames_open = false;
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                Some(done) = self.fetched_rx.recv() => self.finish(done),
                _ = refresh.tick() => self.request_sessions(),
                _ = time::sleep_until(typing_deadline.unwrap_or_else(Instant::now)), if typing_deadline.is_some() => {
                    self.store.expire_typing(Instant::now());
                }
                changed = self.status.changed(), if status_open => {
                    if changed.is_err() {
                        status_open = false;
                        continue;
                    }
                    let epoch = self.status.borrow_and_update().epoch;
                    if reconnected(seen_epoch, epoch) {
                        tracing::info!("Chat socket back, resynchronising");
                        self.resync();
                    }
                    seen_epoch = seen_epoch.max(epoch);
                }
            }
        }
        tracing::debug!("Chat runtime exiting");
    }

    fn handle(&mut self, cmd: StoreCommand) {
        match cmd {
            StoreCommand::LoadSessions { filter, page } => {
                self.filter = filter;
                self.page = page.max(1);
                self.request_sessions();
            }
            StoreCommand::Refresh => self.request_sessions(),
            StoreCommand::LoadSession(id) => self.request_session(id),
            StoreCommand::ClearCurrent => self.store.clear_current(),
            StoreCommand::Acknowledge(id) => self.store.acknowledge(&id),
        }
    }

    /// Catch up on anything the socket may have missed.
    fn resync(&mut self) {
        self.request_sessions();
        if let Some(id) = self.store.current_id().map(str::to_string) {
            self.request_session(id);
        }
    }

    fn request_sessions(&mut self) {
        self.list_request += 1;
        let request = self.list_request;
        let api = Arc::clone(&self.api);
        let filter = self.filter.clone();
        let page = self.page;
        let tx = self.fetched_tx.clone();
        tokio::spawn(async move {
            let result = api.list_sessions(&filter, page).await;
            let _ = tx.send(Fetched::Sessions { request, result });
        });
    }

    fn request_session(&mut self, id: String) {
        self.store.begin_load(&id);
        let api = Arc::clone(&self.api);
        let tx = self.fetched_tx.clone();
        tokio::spawn(async move {
            let result = api.get_session(&id).await;
            let _ = tx.send(Fetched::Session { id, result });
        });
    }

    fn finish(&mut self, done: Fetched) {
        match done {
            Fetched::Sessions { request, result } => {
                if request != self.list_request {
                    tracing::debug!("Discarding stale session listing #{}", request);
                    return;
                }
                match result {
                    Ok(page) => self.store.replace_sessions(page),
                    Err(e) => {
                        if e.is_transient() {
                            tracing::warn!("Failed to load sessions, retrying on next refresh: {}", e);
                        } else {
                            tracing::error!("Failed to load sessions: {}", e);
                        }
                        self.store.record_error(e.to_string());
                    }
                }
            }
            Fetched::Session { id, result } => {
                self.store.finish_load(&id, result.map_err(|e| e.to_string()));
            }
        }
    }
}

/// Whether the socket became ready again after an earlier ready, even if
/// the intermediate states were never observed.
fn reconnected(seen_epoch: u64, epoch: u64) -> bool {
    epoch > seen_epoch && (seen_epoch > 0 || epoch > 1)
}
