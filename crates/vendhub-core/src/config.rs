//! VendHub configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, VendHubError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendHubConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
}

impl VendHubConfig {
    /// Load config from `path`, or defaults when no file exists there.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VendHubError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| VendHubError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to a path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| VendHubError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `VENDHUB_*` environment overrides on top of file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup("VENDHUB_JWT_SECRET").filter(|s| !s.is_empty()) {
            self.auth.jwt_secret = secret;
        }
        if let Some(token) = lookup("VENDHUB_TELEGRAM_TOKEN").filter(|s| !s.is_empty()) {
            let tg = self.telegram.get_or_insert_with(TelegramConfig::default);
            tg.bot_token = token;
            tg.enabled = true;
        }
        if let Some(origins) = lookup("VENDHUB_CORS_ORIGINS") {
            self.gateway.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(path) = lookup("VENDHUB_DB_PATH").filter(|s| !s.is_empty()) {
            self.database.path = path;
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the VendHub home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vendhub")
    }

    /// Config path from `VENDHUB_CONFIG`, falling back to the default.
    pub fn resolve_path() -> PathBuf {
        std::env::var("VENDHUB_CONFIG")
            .map(|p| PathBuf::from(shellexpand::tilde(&p).to_string()))
            .unwrap_or_else(|_| Self::default_path())
    }

    /// Whether the Telegram bot should be started.
    pub fn telegram_enabled(&self) -> bool {
        self.telegram
            .as_ref()
            .is_some_and(|t| t.enabled && !t.bot_token.is_empty())
    }
}

/// Gateway (HTTP + WebSocket) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Allowed CORS origins. Empty means any origin (development).
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }
fn default_body_limit() -> usize { 1_048_576 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: Vec::new(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// SQLite database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.vendhub/vendhub.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl DatabaseConfig {
    /// Database path with `~` expanded. `:memory:` is passed through.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// JWT configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_hours: i64,
}

pub const DEFAULT_JWT_SECRET: &str = "vendhub-dev-secret-change-me";

fn default_jwt_secret() -> String { DEFAULT_JWT_SECRET.into() }
fn default_token_ttl() -> i64 { 24 }

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl(),
        }
    }
}

/// Telegram bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Bot API host; point at a self-hosted bot server if needed.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_poll_interval() -> u64 { 1 }
fn default_api_base() -> String { "https://api.telegram.org".into() }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            poll_interval: default_poll_interval(),
            api_base: default_api_base(),
        }
    }
}

/// Notification relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Push events to assignees over Telegram when the bot is running.
    #[serde(default = "bool_true")]
    pub telegram_push: bool,
}

fn bool_true() -> bool { true }
fn default_history_size() -> usize { 100 }
fn default_channel_capacity() -> usize { 256 }

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            channel_capacity: default_channel_capacity(),
            telegram_push: true,
        }
    }
}

/// Inventory thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// A bunker below this fill level (percent of capacity) counts as low stock.
    #[serde(default = "default_low_stock_percent")]
    pub low_stock_percent: f64,
}

fn default_low_stock_percent() -> f64 { 20.0 }

impl Default for InventoryConfig {
    fn default() -> Self {
        Self { low_stock_percent: default_low_stock_percent() }
    }
}
