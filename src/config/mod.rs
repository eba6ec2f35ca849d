//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{StoredToken, TokenStore};

const DEFAULT_API_URL: &str = "http://localhost:5000/api";
const DEFAULT_WS_URL: &str = "ws://localhost:5000/ws";

const ENV_API_URL: &str = "SUPPORT_CHAT_API_URL";
const ENV_WS_URL: &str = "SUPPORT_CHAT_WS_URL";
const ENV_TOKEN: &str = "SUPPORT_CHAT_TOKEN";

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// REST base URL (e.g. `https://host/api`)
    pub api_url: Option<String>,
    /// WebSocket URL of the chat push channel
    pub ws_url: Option<String>,
    /// Stored authentication token (opaque, issued by the dashboard login)
    pub auth_token: Option<StoredToken>,
    /// Id of the logged-in user, used to tell own messages from others
    pub user_id: Option<String>,
    /// Display name of the logged-in user
    pub user_name: Option<String>,
    /// Timing and paging tunables
    #[serde(default)]
    pub chat: ChatSettings,
}

/// Tunables for reconnection, typing and refresh behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub typing_timeout_ms: u64,
    pub refresh_interval_secs: u64,
    pub follow_up_delay_ms: u64,
    pub page_size: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            typing_timeout_ms: 3000,
            refresh_interval_secs: 300,
            follow_up_delay_ms: 1000,
            page_size: 20,
        }
    }
}

impl ChatSettings {
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn follow_up_delay(&self) -> Duration {
        Duration::from_millis(self.follow_up_delay_ms)
    }
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "support-chat", "support-chat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Overlay values from the environment. Empty variables are ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_API_URL) {
            self.api_url = Some(url);
        }
        if let Some(url) = get(ENV_WS_URL) {
            self.ws_url = Some(url);
        }
        if let Some(token) = get(ENV_TOKEN) {
            self.auth_token = Some(StoredToken::new(token, None));
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn api_url(&self) -> String {
        self.api_url
            .as_deref()
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn ws_url(&self) -> String {
        self.ws_url.as_deref().unwrap_or(DEFAULT_WS_URL).to_string()
    }

    /// The usable token, if any. Expired tokens count as absent.
    pub fn valid_token(&self) -> Option<String> {
        self.auth_token
            .as_ref()
            .filter(|t| !t.is_expired())
            .map(|t| t.token.clone())
    }
}

impl TokenStore for Config {
    fn get_auth_token(&self) -> Option<StoredToken> {
        self.auth_token.clone()
    }

    fn set_auth_token(&mut self, token: String, expires_in: Option<u64>) {
        self.auth_token = Some(StoredToken::new(token, expires_in));
    }

    fn clear_tokens(&mut self) {
        self.auth_token = None;
        self.user_id = None;
        self.user_name = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_chat_table_missing() {
        let config: Config = toml::from_str(r#"api_url = "https://example.test/api/""#).unwrap();
        assert_eq!(config.chat, ChatSettings::default());
        assert_eq!(config.api_url(), "https://example.test/api");
        assert_eq!(config.ws_url(), DEFAULT_WS_URL);
    }

    #[test]
    fn test_partial_chat_table() {
        let config: Config = toml::from_str(
            r#"
            [chat]
            typing_timeout_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(config.chat.typing_timeout(), Duration::from_millis(1500));
        assert_eq!(config.chat.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            ENV_WS_URL => Some("wss://chat.example.test/ws".to_string()),
            ENV_TOKEN => Some("tok".to_string()),
            ENV_API_URL => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.ws_url(), "wss://chat.example.test/ws");
        assert_eq!(config.valid_token().as_deref(), Some("tok"));
        assert!(config.api_url.is_none());
    }

    #[test]
    fn test_clear_tokens() {
        let mut config = Config::default();
        config.set_auth_token("tok".into(), Some(3600));
        config.user_id = Some("u1".into());
        config.clear_tokens();
        assert!(config.valid_token().is_none());
        assert!(config.user_id.is_none());
    }
}
