//! Support Chat - terminal client for property-management live support
//!
//! REST commands for one-off operations, plus a live listener and TUI backed
//! by the push socket.

mod api;
mod auth;
mod chat;
mod config;
mod models;
mod realtime;
#[cfg(test)]
mod testing;
mod tui;

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::models::{Priority, SessionFilter, SessionStatus};

#[derive(Parser)]
#[command(name = "support-chat")]
#[command(about = "Terminal client for property-management support chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the access token issued by the dashboard login
    Login {
        /// Access token
        #[arg(short, long)]
        token: String,

        /// Token lifetime in seconds
        #[arg(long)]
        expires_in: Option<u64>,

        /// Your user id (used to recognise your own messages)
        #[arg(long)]
        user_id: Option<String>,

        /// Your display name
        #[arg(long)]
        user_name: Option<String>,
    },

    /// Clear stored credentials
    Logout,

    /// Show credential and endpoint status
    Status,

    /// List chat sessions
    Sessions {
        /// Filter by status: waiting, active, transferred, closed
        #[arg(short, long)]
        status: Option<SessionStatus>,

        /// Filter by priority: low, medium, high, urgent
        #[arg(short, long)]
        priority: Option<Priority>,

        /// Page number (1-based)
        #[arg(long, default_value = "1")]
        page: u32,
    },

    /// Print a session's messages
    Read {
        /// Session id (from `sessions` output)
        session_id: String,
    },

    /// Send a message to a session
    Send {
        /// Session id
        #[arg(short, long)]
        to: String,

        /// Message content
        message: String,
    },

    /// Open a new support session
    Initiate {
        /// Subject line
        #[arg(short, long)]
        subject: String,

        /// First message
        message: String,

        /// Priority: low, medium, high, urgent
        #[arg(short, long, default_value = "medium")]
        priority: Priority,
    },

    /// Accept a waiting session
    Accept {
        session_id: String,
    },

    /// Close a session
    Close {
        session_id: String,

        /// Reason recorded with the closure
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Print live chat events until Ctrl+C
    Listen {
        /// Open this session and follow its messages
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Launch the terminal user interface
    Tui,
}

/// Logs go to stderr, except under the TUI where they would corrupt the
/// screen and go to a file in the config directory instead.
fn init_tracing(verbose: bool, to_file: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if to_file {
        let dir = Config::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("support-chat.log"))
            .context("Failed to open log file")?;
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, matches!(cli.command, Commands::Tui))?;

    match cli.command {
        Commands::Login {
            token,
            expires_in,
            user_id,
            user_name,
        } => {
            auth::login(&token, expires_in, user_id, user_name).await?;
        }
        Commands::Logout => {
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Sessions {
            status,
            priority,
            page,
        } => {
            tracing::debug!("Fetching sessions...");
            api::list_sessions(SessionFilter { status, priority }, page.max(1)).await?;
        }
        Commands::Read { session_id } => {
            api::read_session(&session_id).await?;
        }
        Commands::Send { to, message } => {
            tracing::debug!("Sending message...");
            api::send_message(&to, &message).await?;
        }
        Commands::Initiate {
            subject,
            message,
            priority,
        } => {
            api::initiate(&subject, &message, priority).await?;
        }
        Commands::Accept { session_id } => {
            api::accept(&session_id).await?;
        }
        Commands::Close { session_id, reason } => {
            api::close(&session_id, reason.as_deref()).await?;
        }
        Commands::Listen { session } => {
            chat::listen::run(session).await?;
        }
        Commands::Tui => {
            tui::run().await?;
        }
    }

    Ok(())
}
