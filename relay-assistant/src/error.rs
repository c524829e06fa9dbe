//! Error taxonomy for assistant operations.

use crate::types::RunStatus;
use std::time::Duration;

/// Result type for assistant operations.
pub type AssistantResult<T> = Result<T, AssistantError>;

/// Failure talking to the assistant provider or waiting on a run.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Network, auth or protocol failure.
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        status_code: Option<u16>,
    },

    /// The provider no longer recognizes the thread (deleted upstream).
    #[error("Thread not recognized by provider: {thread_id}")]
    InvalidThread { thread_id: String },

    /// The run ended without producing a reply.
    #[error("Run {run_id} ended with status {status}: {reason}")]
    RunFailed {
        run_id: String,
        status: RunStatus,
        reason: String,
    },

    /// No terminal status was observed before the ceiling.
    #[error("Run {run_id} did not finish within {waited:?}")]
    RunTimeout { run_id: String, waited: Duration },
}

impl AssistantError {
    /// Provider error without an HTTP status (network, decode, local timeout).
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            status_code: None,
        }
    }

    /// Provider error carrying the HTTP status it was returned with.
    pub fn http(status_code: u16, message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { status_code, .. } => match status_code {
                None => true,
                Some(code) => *code == 408 || *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }

    /// Check if this is an authentication failure.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Provider {
                status_code: Some(401 | 403),
                ..
            }
        )
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(e: reqwest::Error) -> Self {
        Self::Provider {
            message: format!("Request failed: {e}"),
            status_code: e.status().map(|s| s.as_u16()),
        }
    }
}
