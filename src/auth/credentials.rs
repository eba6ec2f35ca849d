//! Store, clear and report the chat credential

use anyhow::{Context, Result};

use super::TokenStore;
use crate::config::Config;

/// Save a token (and optionally the user identity) to the config file.
pub async fn login(
    token: &str,
    expires_in: Option<u64>,
    user_id: Option<String>,
    user_name: Option<String>,
) -> Result<()> {
    let token = token.trim();
    anyhow::ensure!(!token.is_empty(), "Token must not be empty");

    let mut config = Config::load().context("Failed to load config")?;
    config.set_auth_token(token.to_string(), expires_in);
    if user_id.is_some() {
        config.user_id = user_id;
    }
    if user_name.is_some() {
        config.user_name = user_name;
    }
    config.save()?;

    tracing::info!("Token stored");
    println!("Token saved.");
    Ok(())
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_tokens();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    match config.get_auth_token() {
        Some(token) if !token.is_expired() => {
            println!("Token:    valid");
            if let Some(exp) = token.expires_at {
                println!("  expires_at: {}", exp);
            }
        }
        Some(_) => println!("Token:    expired"),
        None => println!("Token:    none"),
    }

    println!(
        "User:     {}",
        config
            .user_name
            .as_deref()
            .or(config.user_id.as_deref())
            .unwrap_or("(unknown)")
    );
    println!("REST:     {}", config.api_url());
    println!("Socket:   {}", config.ws_url());

    Ok(())
}
