//! Line-oriented live view: print connection changes, chat requests and new
//! messages until Ctrl+C.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};

use super::notify::PrintNotifier;
use super::{ChatClient, ChatSnapshot};
use crate::api::format_time;
use crate::config::Config;
use crate::realtime::ConnectionStatus;

pub async fn run(session: Option<String>) -> Result<()> {
    let config = Config::load()?;
    if config.valid_token().is_none() {
        bail!("Not logged in. Run 'support-chat login' first.");
    }
    let client = ChatClient::start(&config, Arc::new(PrintNotifier))?;
    if let Some(ref id) = session {
        client.store.open_session(id);
    }

    println!("Listening for chat events (Ctrl+C to stop)...");

    let mut status = client.connection.watch_status();
    let mut snapshots = client.store.subscribe();
    let mut printer = Printer::default();
    let mut status_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping.");
                break;
            }
            changed = status.changed(), if status_open => match changed {
                Ok(()) => println!("[{}]", describe(&status.borrow_and_update())),
                Err(_) => status_open = false,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                for line in printer.lines(&snapshot) {
                    println!("{}", line);
                }
            }
        }
    }

    client.shutdown();
    Ok(())
}

fn describe(status: &ConnectionStatus) -> String {
    let mut text = format!("connection: {}", status.state.as_str());
    if let Some(ref reason) = status.reason {
        text.push_str(&format!(" - {}", reason));
    }
    if let Some(delay) = status.reconnect_in {
        text.push_str(&format!(" (retrying in {}s)", delay.as_secs()));
    }
    text
}

/// Turns successive snapshots into output lines, each message once.
#[derive(Default)]
struct Printer {
    printed: HashSet<String>,
    current: Option<String>,
    total_unread: u32,
    last_error: Option<String>,
}

impl Printer {
    fn lines(&mut self, snapshot: &ChatSnapshot) -> Vec<String> {
        let mut out = Vec::new();

        let current = snapshot.current.as_ref().map(|s| s.id.clone());
        if current != self.current {
            if let Some(ref session) = snapshot.current {
                out.push(format!(
                    "== {} [{}] ({} messages) ==",
                    session.title(),
                    session.status.as_str(),
                    snapshot.messages.len()
                ));
            }
            self.current = current;
        }

        for msg in &snapshot.messages {
            if self.printed.insert(msg.id.clone()) {
                out.push(format!(
                    "{} {}: {}",
                    format_time(Some(msg.created_at)),
                    msg.sender.display_name(),
                    msg.content
                ));
            }
        }

        if snapshot.total_unread != self.total_unread {
            self.total_unread = snapshot.total_unread;
            out.push(format!("({} unread)", snapshot.total_unread));
        }

        if snapshot.last_error != self.last_error {
            if let Some(ref err) = snapshot.last_error {
                out.push(format!("error: {}", err));
            }
            self.last_error = snapshot.last_error.clone();
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use crate::testing::{message, session};

    #[test]
    fn test_messages_printed_once() {
        let mut printer = Printer::default();
        let mut snapshot = ChatSnapshot {
            current: Some(session("a", SessionStatus::Active)),
            messages: vec![message("m1", "a", "cust", 1)],
            ..Default::default()
        };

        let first = printer.lines(&snapshot);
        assert_eq!(first.len(), 2);
        assert!(first[0].starts_with("== subject a [active]"));
        assert!(first[1].ends_with("cust: message m1"));

        snapshot.messages.push(message("m2", "a", "cust", 2));
        let second = printer.lines(&snapshot);
        assert_eq!(second.len(), 1);
        assert!(second[0].ends_with("message m2"));

        assert!(printer.lines(&snapshot).is_empty());
    }

    #[test]
    fn test_unread_and_errors_reported_on_change() {
        let mut printer = Printer::default();
        let mut snapshot = ChatSnapshot {
            total_unread: 3,
            ..Default::default()
        };
        assert_eq!(printer.lines(&snapshot), vec!["(3 unread)"]);

        snapshot.last_error = Some("offline".into());
        assert_eq!(printer.lines(&snapshot), vec!["error: offline"]);
        assert!(printer.lines(&snapshot).is_empty());
    }
}
