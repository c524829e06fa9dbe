//! Core ThreadStore trait and types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, PersistenceError>;

/// The durable store is unreachable or corrupt.
///
/// Fatal to the request that hit it, not to the process.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for PersistenceError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Association between a chat channel and a provider thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub channel_id: String,
    pub thread_id: String,
}

impl Session {
    pub fn new(channel_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

/// Durable `channel_id -> thread_id` mapping.
///
/// Reads for any key may run concurrently with writes for other keys.
/// Two `store` calls for the same key race; the last writer wins.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Look up the thread for a channel.
    async fn resolve(&self, channel_id: &str) -> StoreResult<Option<String>>;

    /// Persist a mapping, replacing any existing one.
    async fn store(&self, channel_id: &str, thread_id: &str) -> StoreResult<()>;

    /// Persist a mapping only if the channel has none yet.
    ///
    /// Returns the thread ID that is stored after the call, which is
    /// `thread_id` if this call won and the earlier value otherwise.
    async fn insert_if_absent(&self, channel_id: &str, thread_id: &str) -> StoreResult<String>;

    /// Number of stored sessions
    async fn count(&self) -> StoreResult<usize>;

    /// All stored sessions, ordered by channel ID.
    async fn list(&self) -> StoreResult<Vec<Session>>;
}
