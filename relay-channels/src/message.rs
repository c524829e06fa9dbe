//! Message types passed between the platform adapter and the relay.

use serde::{Deserialize, Serialize};

/// Chat platform an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Discord,
    Cli,
}

impl ChannelType {
    /// Get the channel type as a string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Cli => "cli",
        }
    }
}

/// One inbound chat message, normalized across platforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Message ID (platform-specific)
    pub id: String,
    /// Platform
    pub channel_type: ChannelType,
    /// Channel the message was posted in; replies go back here
    pub channel_id: String,
    /// Author identifier
    pub author_id: String,
    /// Author display name
    pub author_name: String,
    /// Message text
    pub text: String,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
    /// Trace ID for this turn
    pub trace_id: String,
}

impl InboundEvent {
    /// Build a text event stamped with the current time and a fresh trace ID.
    pub fn text(
        channel_type: ChannelType,
        channel_id: impl Into<String>,
        author_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            channel_type,
            channel_id: channel_id.into(),
            author_id: String::new(),
            author_name: author_name.into(),
            text: text.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            trace_id: relay_common::logging::generate_trace_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_event_gets_trace_id() {
        let a = InboundEvent::text(ChannelType::Cli, "42", "Ada", "hello");
        let b = InboundEvent::text(ChannelType::Cli, "42", "Ada", "hello");
        assert_ne!(a.trace_id, b.trace_id);
        assert_eq!(a.channel_type.as_str(), "cli");
        assert!(a.timestamp > 0);
    }
}
