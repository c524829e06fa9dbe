//! In-memory session store.

use crate::traits::{Session, StoreResult, ThreadStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Session store held in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    sessions: RwLock<HashMap<String, String>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate from `(channel_id, thread_id)` pairs.
    pub fn with_sessions<I, K, V>(sessions: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            sessions: RwLock::new(
                sessions
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn resolve(&self, channel_id: &str) -> StoreResult<Option<String>> {
        Ok(self.sessions.read().await.get(channel_id).cloned())
    }

    async fn store(&self, channel_id: &str, thread_id: &str) -> StoreResult<()> {
        self.sessions
            .write()
            .await
            .insert(channel_id.to_string(), thread_id.to_string());
        Ok(())
    }

    async fn insert_if_absent(&self, channel_id: &str, thread_id: &str) -> StoreResult<String> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .entry(channel_id.to_string())
            .or_insert_with(|| thread_id.to_string())
            .clone())
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.sessions.read().await.len())
    }

    async fn list(&self) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(channel_id, thread_id)| Session::new(channel_id.as_str(), thread_id.as_str()))
            .collect();
        sessions.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        Ok(sessions)
    }
}
