//! Provider trait for the hosted assistant API.

use crate::error::AssistantResult;
use crate::types::{AssistantMetadata, NewAssistant, NewMessage, Run, ThreadMessage, UploadedFile};
use async_trait::async_trait;
use std::path::Path;

/// Raw thread/run/message primitives exposed by an assistant provider.
///
/// Thread-scoped calls fail with `AssistantError::InvalidThread` when the
/// provider does not know the thread.
#[async_trait]
pub trait AssistantProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Create an empty thread and return its ID.
    async fn create_thread(&self) -> AssistantResult<String>;

    /// Append a message to a thread and return the message ID.
    async fn create_message(&self, thread_id: &str, message: &NewMessage) -> AssistantResult<String>;

    /// Start a run of `assistant_id` against the thread.
    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> AssistantResult<Run>;

    /// Fetch the current state of a run.
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> AssistantResult<Run>;

    /// Ask the provider to cancel a run.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> AssistantResult<Run>;

    /// List thread messages, newest first.
    async fn list_messages(&self, thread_id: &str, limit: u32) -> AssistantResult<Vec<ThreadMessage>>;

    /// Fetch an assistant's configuration.
    async fn retrieve_assistant(&self, assistant_id: &str) -> AssistantResult<AssistantMetadata>;

    /// Create a new assistant.
    async fn create_assistant(&self, assistant: &NewAssistant) -> AssistantResult<AssistantMetadata>;

    /// Upload a document for use by assistants.
    async fn upload_file(&self, path: &Path) -> AssistantResult<UploadedFile>;
}
