//! Assistant client: thread/message operations and the run poll loop.

use crate::error::{AssistantError, AssistantResult};
use crate::openai::OpenAiProvider;
use crate::provider::AssistantProvider;
use crate::types::{
    AssistantMetadata, NewAssistant, NewMessage, Role, Run, RunError, RunHandle, RunStatus,
    ThreadMessage, UploadedFile,
};
use relay_common::config::AssistantConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// How run status is polled.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay before the first status check
    pub initial_interval: Duration,
    /// Upper bound for the delay between checks
    pub max_interval: Duration,
    /// Factor applied to the delay after every non-terminal check
    pub backoff_multiplier: u32,
    /// Ceiling for the whole wait
    pub max_wait: Duration,
    /// Timeout applied to each status call
    pub request_timeout: Duration,
    /// Transient status-call failures tolerated in a row
    pub max_consecutive_errors: u32,
    /// Ask the provider to cancel runs that hit the ceiling
    pub cancel_on_timeout: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&AssistantConfig::default())
    }
}

impl From<&AssistantConfig> for PollPolicy {
    fn from(config: &AssistantConfig) -> Self {
        let poll = &config.poll;
        Self {
            initial_interval: Duration::from_millis(poll.initial_interval_ms),
            max_interval: Duration::from_millis(poll.max_interval_ms),
            backoff_multiplier: poll.backoff_multiplier.max(1),
            max_wait: Duration::from_secs(poll.max_wait_secs),
            request_timeout: config.request_timeout(),
            max_consecutive_errors: poll.max_consecutive_errors,
            cancel_on_timeout: poll.cancel_on_timeout,
        }
    }
}

impl PollPolicy {
    /// Delay to use after `current`, capped at `max_interval`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.backoff_multiplier)
            .min(self.max_interval)
    }
}

/// High-level client over an [`AssistantProvider`].
pub struct AssistantClient {
    provider: Arc<dyn AssistantProvider>,
    poll: PollPolicy,
    history_limit: u32,
}

impl AssistantClient {
    /// Create a client over any provider.
    pub fn new(provider: Arc<dyn AssistantProvider>, poll: PollPolicy) -> Self {
        Self {
            provider,
            poll,
            history_limit: 20,
        }
    }

    /// Create a client backed by the OpenAI provider described by `config`.
    pub fn from_config(config: &AssistantConfig) -> AssistantResult<Self> {
        let provider = Arc::new(OpenAiProvider::from_config(config)?);
        Ok(Self::new(provider, PollPolicy::from(config)).with_history_limit(config.history_limit))
    }

    /// Set how many recent messages are scanned for the reply.
    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Create a new empty thread.
    pub async fn create_thread(&self) -> AssistantResult<String> {
        self.provider.create_thread().await
    }

    /// Post a user message to a thread.
    ///
    /// The author's display name, when known, travels as message metadata.
    pub async fn post_message(
        &self,
        thread_id: &str,
        text: &str,
        author: Option<&str>,
    ) -> AssistantResult<String> {
        let mut message = NewMessage::user(text);
        if let Some(author) = author.filter(|a| !a.is_empty()) {
            message = message.with_metadata("author", author);
        }

        let message_id = self.provider.create_message(thread_id, &message).await?;
        tracing::debug!(thread_id, message_id = %message_id, "Message posted");
        Ok(message_id)
    }

    /// Start a run and wait for the assistant's reply.
    pub async fn run_and_wait(&self, thread_id: &str, assistant_id: &str) -> AssistantResult<String> {
        let run = self.provider.create_run(thread_id, assistant_id).await?;
        let mut handle = RunHandle::from(&run);
        let mut last_error = run.last_error;

        tracing::debug!(
            thread_id,
            run_id = %handle.run_id,
            status = %handle.status,
            "Run started"
        );

        let started = Instant::now();
        self.wait_for_stop(&mut handle, &mut last_error, started)
            .instrument(relay_common::api_call_span!(
                "poll_run",
                provider = self.provider.name(),
                thread_id
            ))
            .await?;

        tracing::info!(
            thread_id,
            run_id = %handle.run_id,
            status = %handle.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finished"
        );

        match handle.status {
            RunStatus::Completed => self.latest_reply(&handle).await,
            RunStatus::RequiresAction => {
                self.cancel_quietly(&handle).await;
                Err(AssistantError::RunFailed {
                    run_id: handle.run_id,
                    status: RunStatus::RequiresAction,
                    reason: "run requires tool outputs, which the relay cannot provide".into(),
                })
            }
            status => Err(AssistantError::RunFailed {
                run_id: handle.run_id,
                status,
                reason: last_error
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .unwrap_or_else(|| "no error details".into()),
            }),
        }
    }

    /// Fetch an assistant's configuration.
    pub async fn get_assistant_metadata(&self, assistant_id: &str) -> AssistantResult<AssistantMetadata> {
        self.provider.retrieve_assistant(assistant_id).await
    }

    /// Create a new assistant.
    pub async fn create_assistant(&self, assistant: &NewAssistant) -> AssistantResult<AssistantMetadata> {
        self.provider.create_assistant(assistant).await
    }

    /// Upload a document for assistant use.
    pub async fn upload_file(&self, path: &Path) -> AssistantResult<UploadedFile> {
        self.provider.upload_file(path).await
    }

    /// Poll until the run stops, the ceiling is hit, or polling fails.
    async fn wait_for_stop(
        &self,
        handle: &mut RunHandle,
        last_error: &mut Option<RunError>,
        started: Instant,
    ) -> AssistantResult<()> {
        let deadline = started + self.poll.max_wait;
        let mut interval = self.poll.initial_interval;
        let mut consecutive_errors = 0u32;

        while !handle.status.stops_polling() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.abandon(handle, started.elapsed()).await);
            }

            tokio::time::sleep(interval.min(remaining)).await;

            match self.poll_once(handle).await {
                Ok(run) => {
                    consecutive_errors = 0;
                    if handle.advance(run.status) {
                        *last_error = run.last_error;
                    }
                    tracing::trace!(run_id = %handle.run_id, status = %handle.status, "Run polled");
                }
                Err(e) if e.is_retryable() && consecutive_errors < self.poll.max_consecutive_errors => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        run_id = %handle.run_id,
                        attempt = consecutive_errors,
                        error = %e,
                        "Run status check failed, will retry"
                    );
                }
                Err(e) => return Err(e),
            }

            interval = self.poll.next_interval(interval);
        }

        Ok(())
    }

    /// One status check bounded by the per-call timeout.
    async fn poll_once(&self, handle: &RunHandle) -> AssistantResult<Run> {
        let call = self.provider.retrieve_run(&handle.thread_id, &handle.run_id);
        match tokio::time::timeout(self.poll.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AssistantError::provider(format!(
                "Run status check timed out after {:?}",
                self.poll.request_timeout
            ))),
        }
    }

    /// Give up on a run that hit the ceiling. The run ID must not be reused.
    async fn abandon(&self, handle: &RunHandle, waited: Duration) -> AssistantError {
        tracing::warn!(
            thread_id = %handle.thread_id,
            run_id = %handle.run_id,
            status = %handle.status,
            waited_ms = waited.as_millis() as u64,
            "Run exceeded wait ceiling, abandoning"
        );

        if self.poll.cancel_on_timeout {
            self.cancel_quietly(handle).await;
        }

        AssistantError::RunTimeout {
            run_id: handle.run_id.clone(),
            waited,
        }
    }

    /// Best-effort cancel; failures are logged only.
    async fn cancel_quietly(&self, handle: &RunHandle) {
        let call = self.provider.cancel_run(&handle.thread_id, &handle.run_id);
        match tokio::time::timeout(self.poll.request_timeout, call).await {
            Ok(Ok(run)) => {
                tracing::debug!(run_id = %handle.run_id, status = %run.status, "Run cancel requested")
            }
            Ok(Err(e)) => tracing::warn!(run_id = %handle.run_id, error = %e, "Run cancel failed"),
            Err(_) => tracing::warn!(run_id = %handle.run_id, "Run cancel timed out"),
        }
    }

    /// Text of the newest assistant message for a completed run.
    async fn latest_reply(&self, handle: &RunHandle) -> AssistantResult<String> {
        let messages = self
            .provider
            .list_messages(&handle.thread_id, self.history_limit)
            .await?;

        select_reply(&messages, &handle.run_id).ok_or_else(|| AssistantError::RunFailed {
            run_id: handle.run_id.clone(),
            status: RunStatus::Completed,
            reason: "no assistant reply in thread".into(),
        })
    }
}

/// Pick the reply text from a thread listing.
///
/// Only assistant messages produced by `run_id` qualify, or untagged
/// assistant messages when the run tagged none. Messages from other runs are
/// never returned. The newest by `created_at` wins; ties keep listing order
/// (newest first).
pub fn select_reply(messages: &[ThreadMessage], run_id: &str) -> Option<String> {
    let assistant = messages
        .iter()
        .filter(|m| m.role == Role::Assistant && m.text().is_some());

    let from_run: Vec<&ThreadMessage> = assistant
        .clone()
        .filter(|m| m.run_id.as_deref() == Some(run_id))
        .collect();

    let candidates = if from_run.is_empty() {
        assistant.filter(|m| m.run_id.is_none()).collect()
    } else {
        from_run
    };

    candidates
        .into_iter()
        .rev()
        .max_by_key(|m| m.created_at)
        .and_then(ThreadMessage::text)
}
