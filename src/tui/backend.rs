//! Async backend: runs gateway calls off the UI loop.
//!
//! The UI sends `BackendCommand` values; each one runs as its own task and
//! reports back with a `BackendResponse` for the status bar.

use tokio::sync::mpsc;

use crate::chat::ChatGateway;

/// Commands sent from the UI loop to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCommand {
    SendMessage { session_id: String, text: String },
    Accept(String),
    Close(String),
    Typing(String),
}

/// Outcome of a command, shown in the status bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendResponse {
    Done(String),
    Failed(String),
}

/// Handle for issuing commands from the UI side.
pub struct Backend {
    cmd_tx: mpsc::UnboundedSender<BackendCommand>,
    resp_rx: mpsc::UnboundedReceiver<BackendResponse>,
}

impl Backend {
    pub fn start(gateway: ChatGateway) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();

        tokio::spawn(backend_loop(gateway, cmd_rx, resp_tx));

        Self { cmd_tx, resp_rx }
    }

    /// Queue a command (non-blocking).
    pub fn send(&self, cmd: BackendCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::error!("Backend channel closed -- command dropped");
        }
    }

    /// Next response. For use inside `tokio::select!`.
    pub async fn recv(&mut self) -> Option<BackendResponse> {
        self.resp_rx.recv().await
    }
}

async fn backend_loop(
    gateway: ChatGateway,
    mut cmd_rx: mpsc::UnboundedReceiver<BackendCommand>,
    resp_tx: mpsc::UnboundedSender<BackendResponse>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        let gateway = gateway.clone();
        let resp_tx = resp_tx.clone();

        tokio::spawn(async move {
            let response = match cmd {
                BackendCommand::SendMessage { session_id, text } => {
                    match gateway.send_message(&session_id, &text).await {
                        Ok(()) => {
                            gateway.send_typing_indicator(&session_id, false).await;
                            None
                        }
                        Err(e) => Some(BackendResponse::Failed(format!("Send failed: {}", e))),
                    }
                }
                BackendCommand::Accept(id) => Some(match gateway.accept_session(&id).await {
                    Ok(()) => BackendResponse::Done(format!("Accepted {}", id)),
                    Err(e) => BackendResponse::Failed(format!("Accept failed: {}", e)),
                }),
                BackendCommand::Close(id) => Some(match gateway.close_session(&id, None).await {
                    Ok(()) => BackendResponse::Done(format!("Closed {}", id)),
                    Err(e) => BackendResponse::Failed(format!("Close failed: {}", e)),
                }),
                BackendCommand::Typing(id) => {
                    gateway.send_typing_indicator(&id, true).await;
                    None
                }
            };
            if let Some(response) = response {
                let _ = resp_tx.send(response);
            }
        });
    }
}
