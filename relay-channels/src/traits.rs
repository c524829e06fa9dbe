//! Channel trait for platform adapters.

use async_trait::async_trait;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outbound side of a chat platform: "send text to channel C".
///
/// Listening is platform-specific and lives on the concrete adapter.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &'static str;

    /// Send one message and return its platform ID.
    ///
    /// `text` must already fit the platform's size limit.
    async fn send_text(&self, channel_id: &str, text: &str) -> ChannelResult<String>;

    /// Check if the channel is healthy.
    async fn health_check(&self) -> ChannelResult<()>;
}
