//! Connection lifecycle: connect, authenticate, reconnect, disconnect
//!
//! A single background task owns the socket. `ConnectionManager` is a cheap
//! handle to it; every clone talks to the same task. The task exits when the
//! last handle is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant};

use super::backoff::ReconnectPolicy;
use super::protocol::{self, OutboundFrame, NORMAL_CLOSURE};
use super::transport::{Connector, SocketEvent, Transport};

/// Buffered inbound frames per subscriber before it starts lagging.
const FRAME_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Authenticating,
    Ready,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Observable connection status.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive abnormal closes since the last `Ready`.
    pub attempt: u32,
    /// Human-readable reason for the last close or failure.
    pub reason: Option<String>,
    /// Set while a reconnect is scheduled.
    pub reconnect_in: Option<Duration>,
    /// Times the socket has reached `Ready`. Observers that may miss
    /// intermediate states compare this to detect a reconnect.
    pub epoch: u64,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            reason: None,
            reconnect_in: None,
            epoch: 0,
        }
    }
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Ready
    }
}

/// One inbound frame with its receipt stamp.
///
/// `seq` increases by one per frame for the lifetime of the manager, so a
/// consumer can tell a new frame from one it already handled.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub seq: u64,
    pub received_at: Instant,
    pub text: Arc<str>,
}

enum Command {
    Connect,
    Disconnect,
    SetToken(Option<String>),
    Send(OutboundFrame, oneshot::Sender<bool>),
}

/// How a single socket's lifetime ended.
enum Outcome {
    /// `disconnect()` was called.
    Stopped,
    /// All handles dropped.
    Shutdown,
    /// Server rejected the credential.
    Rejected(String),
    /// Server closed normally; do not retry.
    ServerClosed(String),
    /// Error or abnormal close; retry per policy.
    Dropped(String),
}

/// Handle to the connection task.
#[derive(Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    last_frame_rx: watch::Receiver<Option<ReceivedFrame>>,
    frames_tx: broadcast::Sender<ReceivedFrame>,
}

impl ConnectionManager {
    /// Spawn the connection task. Nothing is opened until `connect()`.
    pub fn spawn(
        url: String,
        token: Option<String>,
        policy: ReconnectPolicy,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (last_frame_tx, last_frame_rx) = watch::channel(None);
        let (frames_tx, _) = broadcast::channel(FRAME_BUFFER);

        let actor = Actor {
            url,
            token,
            policy,
            connector,
            commands: cmd_rx,
            status_tx,
            last_frame_tx,
            frames_tx: frames_tx.clone(),
            next_seq: 1,
            attempt: 0,
            epoch: 0,
            state: ConnectionState::Idle,
        };
        tokio::spawn(actor.run());

        Self {
            cmd_tx,
            status_rx,
            last_frame_rx,
            frames_tx,
        }
    }

    /// Open the connection. No-op while connecting/ready or without a token.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close with a normal-closure code and cancel any scheduled reconnect.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Replace the credential used for the next connection attempt.
    pub fn set_token(&self, token: Option<String>) {
        self.command(Command::SetToken(token));
    }

    /// Send a frame. Returns `false` unless the connection is ready and the
    /// frame was written to the socket.
    pub async fn send(&self, frame: OutboundFrame) -> bool {
        if !self.status_rx.borrow().is_connected() {
            tracing::debug!("Not ready, refusing {} frame", frame.kind());
            return false;
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Send(frame, reply_tx)).is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Ordered stream of every inbound frame.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<ReceivedFrame> {
        self.frames_tx.subscribe()
    }

    /// Most recent inbound frame.
    pub fn last_frame(&self) -> Option<ReceivedFrame> {
        self.last_frame_rx.borrow().clone()
    }

    pub fn watch_last_frame(&self) -> watch::Receiver<Option<ReceivedFrame>> {
        self.last_frame_rx.clone()
    }

    fn command(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::error!("Connection task gone -- command dropped");
        }
    }
}

struct Actor {
    url: String,
    token: Option<String>,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    last_frame_tx: watch::Sender<Option<ReceivedFrame>>,
    frames_tx: broadcast::Sender<ReceivedFrame>,
    next_seq: u64,
    attempt: u32,
    epoch: u64,
    state: ConnectionState,
}

impl Actor {
    async fn run(mut self) {
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                Command::Connect => {
                    if self.connect_loop().await.is_break() {
                        break;
                    }
                }
                Command::Disconnect => {
                    if self.state != ConnectionState::Idle {
                        self.set_status(ConnectionState::Closed, None, None);
                    }
                }
                Command::SetToken(token) => self.token = token,
                Command::Send(frame, reply) => {
                    tracing::debug!("Not connected, dropping {} frame", frame.kind());
                    let _ = reply.send(false);
                }
            }
        }
        tracing::debug!("Connection task exiting");
    }

    fn set_status(
        &mut self,
        state: ConnectionState,
        reason: Option<String>,
        reconnect_in: Option<Duration>,
    ) {
        if state != self.state {
            tracing::debug!("Connection {} -> {}", self.state.as_str(), state.as_str());
        }
        self.state = state;
        self.status_tx.send_replace(ConnectionStatus {
            state,
            attempt: self.attempt,
            reason,
            reconnect_in,
            epoch: self.epoch,
        });
    }

    /// Connect, and keep reconnecting until stopped, rejected or out of
    /// attempts. Breaks when the task should exit.
    async fn connect_loop(&mut self) -> std::ops::ControlFlow<()> {
        use std::ops::ControlFlow;

        let Some(mut token) = self.token.clone() else {
            tracing::warn!("No auth token, not connecting");
            self.set_status(ConnectionState::Idle, Some("no auth token".to_string()), None);
            return ControlFlow::Continue(());
        };
        self.attempt = 0;

        loop {
            self.set_status(ConnectionState::Connecting, None, None);

            let outcome = match self.open_socket().await {
                Ok(Some(socket)) => self.drive(socket, &token).await,
                Ok(None) => Outcome::Stopped,
                Err(outcome) => outcome,
            };

            match outcome {
                Outcome::Stopped => {
                    self.set_status(ConnectionState::Closed, None, None);
                    return ControlFlow::Continue(());
                }
                Outcome::Shutdown => return ControlFlow::Break(()),
                Outcome::Rejected(reason) => {
                    tracing::warn!("Authentication rejected: {}", reason);
                    // Never retry a rejected credential.
                    self.token = None;
                    self.set_status(ConnectionState::Closed, Some(reason), None);
                    return ControlFlow::Continue(());
                }
                Outcome::ServerClosed(reason) => {
                    tracing::info!("Server closed the connection normally");
                    self.set_status(ConnectionState::Closed, Some(reason), None);
                    return ControlFlow::Continue(());
                }
                Outcome::Dropped(reason) => {
                    self.attempt += 1;
                    if !self.policy.allows(self.attempt) {
                        tracing::warn!(
                            "Chat socket lost: {}. Giving up after {} attempts",
                            reason,
                            self.attempt
                        );
                        self.set_status(
                            ConnectionState::Closed,
                            Some(format!("disconnected: {}", reason)),
                            None,
                        );
                        return ControlFlow::Continue(());
                    }

                    let delay = self.policy.delay(self.attempt);
                    tracing::warn!(
                        "Chat socket lost: {}. Reconnecting in {:?} (attempt {})",
                        reason,
                        delay,
                        self.attempt
                    );
                    self.set_status(ConnectionState::Closed, Some(reason), Some(delay));

                    match self.wait_backoff(delay).await {
                        Backoff::Elapsed => {}
                        Backoff::Cancelled => {
                            self.set_status(ConnectionState::Closed, None, None);
                            return ControlFlow::Continue(());
                        }
                        Backoff::Shutdown => return ControlFlow::Break(()),
                    }
                    // Pick up a token replaced during the wait.
                    match self.token.clone() {
                        Some(t) => token = t,
                        None => {
                            self.set_status(
                                ConnectionState::Idle,
                                Some("no auth token".to_string()),
                                None,
                            );
                            return ControlFlow::Continue(());
                        }
                    }
                }
            }
        }
    }

    /// Open a socket while still answering commands.
    ///
    /// `Ok(None)` means `disconnect()` arrived first.
    async fn open_socket(&mut self) -> Result<Option<Box<dyn Transport>>, Outcome> {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let opening = async move { connector.connect(&url).await };
        tokio::pin!(opening);

        loop {
            tokio::select! {
                result = &mut opening => {
                    return result
                        .map(Some)
                        .map_err(|e| Outcome::Dropped(format!("{:#}", e)));
                }
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Disconnect) => return Ok(None),
                    Some(Command::SetToken(token)) => self.token = token,
                    Some(Command::Connect) => {}
                    Some(Command::Send(_, reply)) => {
                        let _ = reply.send(false);
                    }
                    None => return Err(Outcome::Shutdown),
                },
            }
        }
    }

    /// Authenticate and pump one socket until it ends.
    async fn drive(&mut self, mut socket: Box<dyn Transport>, token: &str) -> Outcome {
        self.set_status(ConnectionState::Open, None, None);

        // Nothing may precede the authenticate frame.
        let auth = OutboundFrame::Authenticate {
            token: token.to_string(),
        };
        if let Err(e) = socket.send_text(auth.to_json()).await {
            return Outcome::Dropped(format!("{:#}", e));
        }
        self.set_status(ConnectionState::Authenticating, None, None);

        loop {
            tokio::select! {
                event = socket.recv() => match event {
                    Ok(SocketEvent::Text(text)) => {
                        let kind = protocol::frame_type(&text);
                        let rejection = match kind.as_deref() {
                            Some("auth_error") => Some(
                                auth_error_message(&text)
                                    .unwrap_or_else(|| "authentication failed".to_string()),
                            ),
                            _ => None,
                        };
                        self.publish(text);
                        match kind.as_deref() {
                            Some("auth_success") => {
                                tracing::info!("Chat socket authenticated");
                                self.attempt = 0;
                                self.epoch += 1;
                                self.set_status(ConnectionState::Ready, None, None);
                            }
                            Some("auth_error") => {
                                let reason = rejection.unwrap_or_default();
                                self.set_status(ConnectionState::Closing, None, None);
                                if let Err(e) = socket.close(NORMAL_CLOSURE).await {
                                    tracing::debug!("Close after auth_error failed: {:#}", e);
                                }
                                return Outcome::Rejected(reason);
                            }
                            _ => {}
                        }
                    }
                    Ok(SocketEvent::Closed { code, reason }) => {
                        if code == Some(NORMAL_CLOSURE) {
                            return Outcome::ServerClosed(reason);
                        }
                        let code = code.map_or("none".to_string(), |c| c.to_string());
                        return Outcome::Dropped(format!("closed (code {}) {}", code, reason).trim_end().to_string());
                    }
                    Err(e) => return Outcome::Dropped(format!("{:#}", e)),
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(frame, reply)) => {
                        if self.state != ConnectionState::Ready {
                            tracing::debug!("Not authenticated yet, refusing {} frame", frame.kind());
                            let _ = reply.send(false);
                            continue;
                        }
                        match socket.send_text(frame.to_json()).await {
                            Ok(()) => {
                                let _ = reply.send(true);
                            }
                            Err(e) => {
                                let _ = reply.send(false);
                                return Outcome::Dropped(format!("{:#}", e));
                            }
                        }
                    }
                    Some(Command::Disconnect) => {
                        self.set_status(ConnectionState::Closing, None, None);
                        if let Err(e) = socket.close(NORMAL_CLOSURE).await {
                            tracing::debug!("Close failed: {:#}", e);
                        }
                        return Outcome::Stopped;
                    }
                    Some(Command::SetToken(token)) => self.token = token,
                    Some(Command::Connect) => {}
                    None => {
                        let _ = socket.close(NORMAL_CLOSURE).await;
                        return Outcome::Shutdown;
                    }
                },
            }
        }
    }

    fn publish(&mut self, text: String) {
        let frame = ReceivedFrame {
            seq: self.next_seq,
            received_at: Instant::now(),
            text: Arc::from(text),
        };
        self.next_seq += 1;
        // No subscribers is fine.
        let _ = self.frames_tx.send(frame.clone());
        self.last_frame_tx.send_replace(Some(frame));
    }

    async fn wait_backoff(&mut self, delay: Duration) -> Backoff {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Backoff::Elapsed,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Disconnect) => return Backoff::Cancelled,
                    Some(Command::SetToken(token)) => self.token = token,
                    Some(Command::Connect) => {}
                    Some(Command::Send(frame, reply)) => {
                        tracing::debug!("Reconnecting, dropping {} frame", frame.kind());
                        let _ = reply.send(false);
                    }
                    None => return Backoff::Shutdown,
                },
            }
        }
    }
}

enum Backoff {
    Elapsed,
    Cancelled,
    Shutdown,
}

fn auth_error_message(text: &str) -> Option<String> {
    match protocol::InboundFrame::parse(text) {
        Ok(protocol::InboundFrame::AuthError { message }) => message,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConnector;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }

    fn spawn(connector: &Arc<ScriptedConnector>, token: Option<&str>) -> ConnectionManager {
        ConnectionManager::spawn(
            "ws://test/ws".to_string(),
            token.map(String::from),
            policy(),
            connector.clone(),
        )
    }

    async fn wait_state(manager: &ConnectionManager, state: ConnectionState) -> ConnectionStatus {
        let mut rx = manager.watch_status();
        let status = rx.wait_for(|s| s.state == state).await.unwrap().clone();
        status
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_token_is_noop() {
        let connector = Arc::new(ScriptedConnector::new());
        let manager = spawn(&connector, None);
        manager.connect();
        let status = wait_state(&manager, ConnectionState::Idle).await;
        tokio::task::yield_now().await;
        assert_eq!(connector.connect_count(), 0);
        assert!(!status.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_authenticate_is_first_frame() {
        let connector = Arc::new(ScriptedConnector::new());
        let socket = connector.push_socket();
        let manager = spawn(&connector, Some("secret"));
        manager.connect();
        wait_state(&manager, ConnectionState::Authenticating).await;

        // Not ready yet: typing is refused and nothing else hits the wire.
        assert!(!manager.send(OutboundFrame::typing("s1", true)).await);
        let sent = socket.sent();
        assert_eq!(sent.len(), 1);
        let first: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(first["type"], "authenticate");
        assert_eq!(first["token"], "secret");

        socket.push_text(r#"{"type":"auth_success"}"#);
        wait_state(&manager, ConnectionState::Ready).await;
        assert!(manager.send(OutboundFrame::typing("s1", true)).await);
        assert_eq!(socket.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_stops_without_retry() {
        let connector = Arc::new(ScriptedConnector::new());
        let socket = connector.push_socket();
        connector.push_socket();
        let manager = spawn(&connector, Some("stale"));
        manager.connect();
        wait_state(&manager, ConnectionState::Authenticating).await;

        socket.push_text(r#"{"type":"auth_error","message":"token expired"}"#);
        let status = wait_state(&manager, ConnectionState::Closed).await;
        assert_eq!(status.reason.as_deref(), Some("token expired"));
        assert_eq!(socket.closed_with(), Some(NORMAL_CLOSURE));

        // Same credential: connect() is a no-op now.
        time::sleep(Duration::from_secs(60)).await;
        manager.connect();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.connect_count(), 1);

        // A fresh token allows a new attempt.
        manager.set_token(Some("fresh".into()));
        manager.connect();
        wait_state(&manager, ConnectionState::Authenticating).await;
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_and_ceiling() {
        let connector = Arc::new(ScriptedConnector::new());
        // No scripted sockets: every attempt fails.
        let manager = spawn(&connector, Some("tok"));
        manager.connect();

        let mut rx = manager.watch_status();
        let status = rx
            .wait_for(|s| s.state == ConnectionState::Closed && s.reconnect_in.is_none())
            .await
            .unwrap()
            .clone();
        assert_eq!(status.attempt, 5);
        assert!(status.reason.unwrap().starts_with("disconnected"));
        assert_eq!(connector.connect_count(), 5);

        let times = connector.connect_times();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );

        // Nothing further is scheduled.
        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.connect_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_reset_after_ready() {
        let connector = Arc::new(ScriptedConnector::new());
        let first = connector.push_socket();
        connector.fail_next(2);
        let third = connector.push_socket();
        let manager = spawn(&connector, Some("tok"));
        manager.connect();

        wait_state(&manager, ConnectionState::Authenticating).await;
        first.push_text(r#"{"type":"auth_success"}"#);
        wait_state(&manager, ConnectionState::Ready).await;
        first.drop_connection();

        // Two failed attempts, then the third socket authenticates.
        wait_state(&manager, ConnectionState::Authenticating).await;
        assert_eq!(manager.status().attempt, 3);
        third.push_text(r#"{"type":"auth_success"}"#);
        let status = wait_state(&manager, ConnectionState::Ready).await;
        assert_eq!(status.attempt, 0);
        assert_eq!(status.epoch, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_reconnect() {
        let connector = Arc::new(ScriptedConnector::new());
        let manager = spawn(&connector, Some("tok"));
        manager.connect();

        let mut rx = manager.watch_status();
        rx.wait_for(|s| s.reconnect_in.is_some()).await.unwrap();
        manager.disconnect();
        manager.disconnect();
        rx.wait_for(|s| s.state == ConnectionState::Closed && s.reconnect_in.is_none())
            .await
            .unwrap();

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_disconnect_sends_normal_closure() {
        let connector = Arc::new(ScriptedConnector::new());
        let socket = connector.push_socket();
        let manager = spawn(&connector, Some("tok"));
        manager.connect();
        wait_state(&manager, ConnectionState::Authenticating).await;
        socket.push_text(r#"{"type":"auth_success"}"#);
        wait_state(&manager, ConnectionState::Ready).await;

        manager.disconnect();
        wait_state(&manager, ConnectionState::Closed).await;
        assert_eq!(socket.closed_with(), Some(NORMAL_CLOSURE));
        assert!(!manager.send(OutboundFrame::typing("s", false)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_normal_close_does_not_retry() {
        let connector = Arc::new(ScriptedConnector::new());
        let socket = connector.push_socket();
        let manager = spawn(&connector, Some("tok"));
        manager.connect();
        wait_state(&manager, ConnectionState::Authenticating).await;
        socket.push_close(Some(NORMAL_CLOSURE));
        wait_state(&manager, ConnectionState::Closed).await;

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_stamped_in_order() {
        let connector = Arc::new(ScriptedConnector::new());
        let socket = connector.push_socket();
        let manager = spawn(&connector, Some("tok"));
        let mut frames = manager.subscribe_frames();
        manager.connect();
        wait_state(&manager, ConnectionState::Authenticating).await;

        socket.push_text(r#"{"type":"auth_success"}"#);
        socket.push_text(r#"{"type":"new_email"}"#);

        let a = frames.recv().await.unwrap();
        let b = frames.recv().await.unwrap();
        assert!(b.seq > a.seq);
        assert!(b.received_at >= a.received_at);
        assert!(b.text.contains("new_email"));
        assert_eq!(manager.last_frame().unwrap().seq, b.seq);
    }
}
