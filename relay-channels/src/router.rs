//! Session routing: channel → thread resolution and one assistant turn.

use dashmap::DashMap;
use relay_assistant::{AssistantClient, AssistantError};
use relay_store::{PersistenceError, ThreadStore};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Failure of one routed turn.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Assistant(#[from] AssistantError),
}

impl RouterError {
    /// Short notice shown to the chat channel for this failure.
    pub fn user_notice(&self) -> &'static str {
        match self {
            Self::Assistant(AssistantError::RunTimeout { .. }) => {
                "The assistant took too long to answer. Please try again."
            }
            Self::Assistant(AssistantError::RunFailed { .. }) => {
                "The assistant could not produce a reply this time. Please try again."
            }
            Self::Assistant(_) => "The assistant service is unavailable right now. Please try again later.",
            Self::Persistence(_) => "Something went wrong storing this conversation. Please try again.",
        }
    }
}

/// Resolves a channel's thread, runs one turn against it, returns the reply.
///
/// Turns for the same channel are serialized; different channels proceed
/// independently.
pub struct SessionRouter {
    store: Arc<dyn ThreadStore>,
    assistant: Arc<AssistantClient>,
    assistant_id: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionRouter {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        assistant: Arc<AssistantClient>,
        assistant_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            assistant,
            assistant_id: assistant_id.into(),
            locks: DashMap::new(),
        }
    }

    /// Handle one inbound message and return the assistant's reply.
    ///
    /// Errors propagate unmodified; the caller decides what the user sees.
    pub async fn handle(
        &self,
        channel_id: &str,
        author_name: &str,
        text: &str,
    ) -> Result<String, RouterError> {
        let lease = ChannelLease::acquire(&self.locks, channel_id);
        let _turn = lease.lock.lock().await;
        self.turn(channel_id, author_name, text).await
    }

    async fn turn(&self, channel_id: &str, author_name: &str, text: &str) -> Result<String, RouterError> {
        let author = Some(author_name).filter(|a| !a.is_empty());
        let mut thread_id = self.resolve_or_create(channel_id).await?;

        match self.assistant.post_message(&thread_id, text, author).await {
            Ok(_) => {}
            Err(AssistantError::InvalidThread { .. }) => {
                tracing::warn!(
                    channel_id,
                    stale_thread_id = %thread_id,
                    "Stored thread no longer exists, replacing it"
                );
                thread_id = self.assistant.create_thread().await?;
                self.store.store(channel_id, &thread_id).await?;
                self.assistant.post_message(&thread_id, text, author).await?;
            }
            Err(e) => return Err(e.into()),
        }

        let reply = self
            .assistant
            .run_and_wait(&thread_id, &self.assistant_id)
            .await?;

        tracing::debug!(channel_id, thread_id = %thread_id, reply_len = reply.len(), "Turn complete");
        Ok(reply)
    }

    /// Existing thread for the channel, or a new one persisted before use.
    async fn resolve_or_create(&self, channel_id: &str) -> Result<String, RouterError> {
        if let Some(thread_id) = self.store.resolve(channel_id).await? {
            tracing::debug!(channel_id, thread_id = %thread_id, "Reusing thread");
            return Ok(thread_id);
        }

        let created = self.assistant.create_thread().await?;
        let stored = self.store.insert_if_absent(channel_id, &created).await?;

        if stored == created {
            tracing::info!(channel_id, thread_id = %created, "Created thread for channel");
        } else {
            // Another process won the race; its thread is the channel's thread
            tracing::warn!(
                channel_id,
                thread_id = %stored,
                orphaned_thread_id = %created,
                "Channel already had a thread, discarding the new one"
            );
        }

        Ok(stored)
    }

    /// Number of channels with a turn in flight or queued on the lock.
    pub fn active_channels(&self) -> usize {
        self.locks.len()
    }
}

/// A turn's hold on its channel lock entry.
///
/// Dropping the lease (including when the turn's future is dropped) removes
/// the entry once nobody else holds or awaits it.
struct ChannelLease<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    channel_id: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> ChannelLease<'a> {
    fn acquire(locks: &'a DashMap<String, Arc<Mutex<()>>>, channel_id: &'a str) -> Self {
        let lock = locks
            .entry(channel_id.to_string())
            .or_default()
            .value()
            .clone();
        Self {
            locks,
            channel_id,
            lock,
        }
    }
}

impl Drop for ChannelLease<'_> {
    fn drop(&mut self) {
        // Release this handle first so the count below sees only others
        drop(std::mem::take(&mut self.lock));
        self.locks
            .remove_if(self.channel_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
