//! Application configuration
//!
//! Every knob has a built-in default and can be overridden from the
//! environment via [`Config::from_env`].

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Remote agent endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the agent API; the client posts to `{base_url}/chat`.
    pub base_url: String,
    /// Per-request timeout. A timeout counts as a transient network failure.
    pub timeout: Duration,
    /// Total attempts per logical send, including the first one.
    pub retry_attempts: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ai-chat-serveless.vercel.app/api".into(),
            timeout: Duration::from_secs(10),
            retry_attempts: 3,
        }
    }
}

/// Per-conversation send gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum spacing between consecutive allowed sends in one conversation.
    pub cooldown: Duration,
    /// Lifetime message ceiling per conversation.
    pub max_messages_per_chat: u32,
    /// How often idle limiter entries are purged; entries older than this are
    /// dropped on each tick.
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(3000),
            max_messages_per_chat: 30,
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

/// Durable storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. Storage falls back to in-memory if it cannot open.
    pub db_path: PathBuf,
    /// Fixed key the serialized conversation list is stored under.
    pub store_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/persona-chat.db"),
            store_name: "chats".into(),
        }
    }
}

/// Cross-tab sync channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Broadcast topic name; instances sharing a hub and a name see each other.
    pub channel_name: String,
    /// Delay before a reconnect attempt after a transport failure.
    pub reconnect_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_name: "chat-sync".into(),
            reconnect_delay: Duration::from_millis(1000),
        }
    }
}

/// Conversation list policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Capacity of the conversation list; creating one past this evicts the
    /// least-recently-updated conversation.
    pub max_chats: usize,
    /// Ceiling on user-driven retries of a failed send.
    pub max_retries: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_chats: 5,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub rate_limit: RateLimitConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub chat: ChatConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Ok(url) = env::var("CHAT_API_URL") {
            config.api.base_url = url;
        }
        if let Some(ms) = env_millis("CHAT_API_TIMEOUT_MS") {
            config.api.timeout = ms;
        }
        if let Some(n) = env_parse("CHAT_API_RETRY_ATTEMPTS") {
            config.api.retry_attempts = n;
        }

        if let Some(ms) = env_millis("RATE_LIMIT_COOLDOWN_MS") {
            config.rate_limit.cooldown = ms;
        }
        if let Some(n) = env_parse("RATE_LIMIT_MAX_MESSAGES") {
            config.rate_limit.max_messages_per_chat = n;
        }
        if let Some(ms) = env_millis("RATE_LIMIT_CLEANUP_INTERVAL_MS") {
            config.rate_limit.cleanup_interval = ms;
        }

        if let Ok(path) = env::var("CHAT_DB_PATH") {
            config.storage.db_path = PathBuf::from(path);
        }

        if let Ok(name) = env::var("SYNC_CHANNEL") {
            config.sync.channel_name = name;
        }
        if let Some(ms) = env_millis("SYNC_RECONNECT_DELAY_MS") {
            config.sync.reconnect_delay = ms;
        }

        if let Some(n) = env_parse("MAX_CHATS") {
            config.chat.max_chats = n;
        }
        if let Some(n) = env_parse("MAX_RETRIES") {
            config.chat.max_retries = n;
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.timeout, Duration::from_secs(10));
        assert_eq!(config.api.retry_attempts, 3);
        assert_eq!(config.rate_limit.cooldown, Duration::from_millis(3000));
        assert_eq!(config.rate_limit.max_messages_per_chat, 30);
        assert_eq!(config.chat.max_chats, 5);
        assert_eq!(config.sync.channel_name, "chat-sync");
    }
}
