//! Provider data types: runs, messages, assistants, files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Runs
// ============================================================================

/// Lifecycle status of a run.
///
/// `queued -> in_progress -> {completed | failed | cancelled | expired}`.
/// The provider also reports `requires_action`, `cancelling` and `incomplete`;
/// anything else deserializes as `Unknown` and is treated as still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Incomplete => "incomplete",
            Self::Unknown => "unknown",
        }
    }

    /// No transition leaves a terminal status.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired | Self::Incomplete
        )
    }

    /// Whether the poll loop should stop watching this run.
    ///
    /// `requires_action` is not terminal for the provider, but the relay has
    /// no client-side tools to satisfy it.
    pub const fn stops_polling(&self) -> bool {
        self.is_terminal() || matches!(self, Self::RequiresAction)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Run object as returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

/// Client-side view of one run, owned by the poll loop until it stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub thread_id: String,
    pub run_id: String,
    pub status: RunStatus,
}

impl RunHandle {
    pub fn new(thread_id: impl Into<String>, run_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            status,
        }
    }

    /// Record a newly observed status.
    ///
    /// Returns `false` and keeps the current status if the run is already
    /// terminal, so a failed run can never later read as completed.
    pub fn advance(&mut self, next: RunStatus) -> bool {
        if self.status.is_terminal() {
            if next != self.status {
                tracing::warn!(
                    run_id = %self.run_id,
                    current = %self.status,
                    observed = %next,
                    "Ignoring status change after terminal status"
                );
            }
            return false;
        }
        self.status = next;
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl From<&Run> for RunHandle {
    fn from(run: &Run) -> Self {
        Self::new(run.thread_id.clone(), run.id.clone(), run.status)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Author role of a thread message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    #[serde(other)]
    Other,
}

/// Message to append to a thread.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl NewMessage {
    /// User-authored message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata key/value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Message stored in a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<MessageContent>,
    /// Unix seconds
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl ThreadMessage {
    /// All text parts joined with newlines, or `None` if there are none.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|c| match c {
                MessageContent::Text { text } => Some(text.value.as_str()),
                MessageContent::Other => None,
            })
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// One content part of a thread message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextContent },
    /// Images, file references and other non-text parts
    #[serde(other)]
    Other,
}

/// Text payload of a message part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    pub value: String,
}

// ============================================================================
// Assistants and Files
// ============================================================================

/// Tool enabled on an assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ToolSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }

    pub fn file_search() -> Self {
        Self::new("file_search")
    }
}

/// Assistant configuration as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMetadata {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

/// Parameters for creating an assistant.
#[derive(Debug, Clone)]
pub struct NewAssistant {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<ToolSpec>,
    /// Uploaded files made searchable through the `file_search` tool
    pub file_ids: Vec<String>,
}

/// File uploaded to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub purpose: String,
}
