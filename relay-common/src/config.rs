//! Configuration management for assistant-relay.
//!
//! The relay reads a single configuration file at `~/.assistant-relay/config.json`.
//! A missing file is not an error; every field has a default, and credentials
//! usually come from the environment.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## Assistant provider
//! - `OPENAI_API_KEY` / `OPEN_AI_API_KEY` → assistant.api_key
//! - `OPENAI_BASE_URL` → assistant.base_url
//! - `OPENAI_ASSISTANT_ID` / `OPEN_AI_ASSISTANT_ID` → assistant.assistant_id
//!
//! ## Discord
//! - `DISCORD_TOKEN` → discord.bot_token
//! - `DISCORD_GUILD` → discord.guild_id
//! - `DISCORD_CHANNEL_ID` (comma separated) → discord.allowed_channels
//!
//! ## Relay
//! - `RELAY_DB_PATH` → store.path
//! - `RELAY_STORE_BACKEND` → store.backend
//! - `RELAY_LOG_LEVEL` → observability.log_level
//! - `RELAY_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".assistant-relay"),
        |dirs| dirs.home_dir().join(".assistant-relay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub assistant: AssistantConfig,

    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Assistant provider
        if let Some(key) = get("OPENAI_API_KEY").or_else(|| get("OPEN_AI_API_KEY")) {
            self.assistant.api_key = Some(key);
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.assistant.base_url = url;
        }
        if let Some(id) = get("OPENAI_ASSISTANT_ID").or_else(|| get("OPEN_AI_ASSISTANT_ID")) {
            self.assistant.assistant_id = Some(id);
        }

        // Discord
        if let Some(token) = get("DISCORD_TOKEN") {
            self.discord.bot_token = Some(token);
        }
        if let Some(guild) = get("DISCORD_GUILD") {
            self.discord.guild_id = Some(guild);
        }
        if let Some(channels) = get("DISCORD_CHANNEL_ID") {
            self.discord.allowed_channels = channels
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect();
        }

        // Store
        if let Some(path) = get("RELAY_DB_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(backend) = get("RELAY_STORE_BACKEND") {
            match backend.parse() {
                Ok(b) => self.store.backend = b,
                Err(e) => tracing::warn!(error = %e, "Ignoring RELAY_STORE_BACKEND"),
            }
        }

        // Observability
        if let Some(level) = get("RELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = get("RELAY_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }
}

// ============================================================================
// Assistant Provider Configuration
// ============================================================================

/// Hosted assistant provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Provider API credential, passed through as a bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    /// Assistant that every run is started against
    #[serde(default)]
    pub assistant_id: Option<String>,

    /// Provider API base URL (including the version segment)
    #[serde(default = "default_assistant_base_url")]
    pub base_url: String,

    /// Timeout for a single provider call, including each poll
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Number of thread messages fetched when selecting the reply
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    #[serde(default)]
    pub poll: PollConfig,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            assistant_id: None,
            base_url: default_assistant_base_url(),
            request_timeout_secs: default_request_timeout(),
            history_limit: default_history_limit(),
            poll: PollConfig::default(),
        }
    }
}

impl AssistantConfig {
    /// Per-call timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Run status polling configuration.
///
/// The interval starts at `initial_interval_ms` and is multiplied by
/// `backoff_multiplier` after every non-terminal poll, capped at
/// `max_interval_ms`. Polling stops after `max_wait_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_initial_interval")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_poll_max_interval")]
    pub max_interval_ms: u64,

    #[serde(default = "default_poll_multiplier")]
    pub backoff_multiplier: u32,

    /// Maximum wait for a terminal run status
    #[serde(default = "default_poll_max_wait")]
    pub max_wait_secs: u64,

    /// Consecutive transient poll failures tolerated before giving up
    #[serde(default = "default_poll_max_errors")]
    pub max_consecutive_errors: u32,

    /// Ask the provider to cancel a run that exceeded `max_wait_secs`
    #[serde(default = "default_true")]
    pub cancel_on_timeout: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_poll_initial_interval(),
            max_interval_ms: default_poll_max_interval(),
            backoff_multiplier: default_poll_multiplier(),
            max_wait_secs: default_poll_max_wait(),
            max_consecutive_errors: default_poll_max_errors(),
            cancel_on_timeout: true,
        }
    }
}

// ============================================================================
// Discord Configuration
// ============================================================================

/// Discord channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Only messages from this guild are relayed
    #[serde(default)]
    pub guild_id: Option<String>,

    /// Channels the bot answers in (empty = all)
    #[serde(default)]
    pub allowed_channels: Vec<String>,

    #[serde(default = "default_discord_api_base")]
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            guild_id: None,
            allowed_channels: Vec::new(),
            api_base: default_discord_api_base(),
        }
    }
}

// ============================================================================
// Store Configuration
// ============================================================================

/// Session store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Durable SQLite file
    #[default]
    Sqlite,
    /// Process memory, lost on restart
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

/// Session store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite database path; defaults to `~/.assistant-relay/threads.db`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn db_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| config_dir().join("threads.db"))
    }
}

// ============================================================================
// Chunking Configuration
// ============================================================================

/// Reply chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters per outbound message (Discord allows 2000)
    #[serde(default = "default_chunk_max_len")]
    pub max_len: usize,

    /// Prefer cutting at newlines and whitespace
    #[serde(default)]
    pub prefer_boundaries: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_len: default_chunk_max_len(),
            prefer_boundaries: false,
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to clamp to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_assistant_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_history_limit() -> u32 {
    20
}

fn default_poll_initial_interval() -> u64 {
    500
}

fn default_poll_max_interval() -> u64 {
    4000
}

fn default_poll_multiplier() -> u32 {
    2
}

fn default_poll_max_wait() -> u64 {
    120
}

fn default_poll_max_errors() -> u32 {
    3
}

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".into()
}

fn default_chunk_max_len() -> usize {
    2000
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}
