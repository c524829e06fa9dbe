//! OpenAI Assistants (v2) provider implementation.

use crate::error::{AssistantError, AssistantResult};
use crate::provider::AssistantProvider;
use crate::types::{AssistantMetadata, NewAssistant, NewMessage, Run, ThreadMessage, UploadedFile};
use async_trait::async_trait;
use relay_common::config::AssistantConfig;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

/// OpenAI Assistants API provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiProvider {
    /// Default API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// Create a provider with an explicit base URL and per-request timeout.
    pub fn new(
        api_key: &str,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> AssistantResult<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| AssistantError::provider(format!("Invalid API key header: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert("openai-beta", HeaderValue::from_static("assistants=v2"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AssistantError::provider(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a provider from configuration.
    pub fn from_config(config: &AssistantConfig) -> AssistantResult<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| AssistantError::provider("No API key configured"))?;
        Self::new(api_key, config.base_url.clone(), config.request_timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Decode a provider response, mapping failures onto the error taxonomy.
///
/// A 404 on a thread-scoped call means the thread is gone.
async fn decode<T: DeserializeOwned>(
    response: Response,
    thread_id: Option<&str>,
) -> AssistantResult<T> {
    let status = response.status();

    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| AssistantError::provider(format!("Failed to parse response: {e}")));
    }

    if status == StatusCode::NOT_FOUND {
        if let Some(thread_id) = thread_id {
            return Err(AssistantError::InvalidThread {
                thread_id: thread_id.to_string(),
            });
        }
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);

    Err(AssistantError::http(status.as_u16(), message))
}

#[async_trait]
impl AssistantProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn create_thread(&self) -> AssistantResult<String> {
        let response = self
            .client
            .post(self.url("threads"))
            .json(&json!({}))
            .send()
            .await?;

        let thread: IdResponse = decode(response, None).await?;
        tracing::debug!(thread_id = %thread.id, "Thread created");
        Ok(thread.id)
    }

    async fn create_message(&self, thread_id: &str, message: &NewMessage) -> AssistantResult<String> {
        let response = self
            .client
            .post(self.url(&format!("threads/{thread_id}/messages")))
            .json(message)
            .send()
            .await?;

        let created: IdResponse = decode(response, Some(thread_id)).await?;
        Ok(created.id)
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> AssistantResult<Run> {
        let response = self
            .client
            .post(self.url(&format!("threads/{thread_id}/runs")))
            .json(&json!({ "assistant_id": assistant_id }))
            .send()
            .await?;

        decode(response, Some(thread_id)).await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> AssistantResult<Run> {
        let response = self
            .client
            .get(self.url(&format!("threads/{thread_id}/runs/{run_id}")))
            .send()
            .await?;

        decode(response, Some(thread_id)).await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> AssistantResult<Run> {
        let response = self
            .client
            .post(self.url(&format!("threads/{thread_id}/runs/{run_id}/cancel")))
            .send()
            .await?;

        decode(response, Some(thread_id)).await
    }

    async fn list_messages(&self, thread_id: &str, limit: u32) -> AssistantResult<Vec<ThreadMessage>> {
        let response = self
            .client
            .get(self.url(&format!("threads/{thread_id}/messages")))
            .query(&[("limit", limit.to_string()), ("order", "desc".to_string())])
            .send()
            .await?;

        let list: ListResponse<ThreadMessage> = decode(response, Some(thread_id)).await?;
        Ok(list.data)
    }

    async fn retrieve_assistant(&self, assistant_id: &str) -> AssistantResult<AssistantMetadata> {
        let response = self
            .client
            .get(self.url(&format!("assistants/{assistant_id}")))
            .send()
            .await?;

        decode(response, None).await
    }

    async fn create_assistant(&self, assistant: &NewAssistant) -> AssistantResult<AssistantMetadata> {
        let mut body = json!({
            "name": assistant.name,
            "instructions": assistant.instructions,
            "model": assistant.model,
            "tools": assistant.tools,
        });

        if !assistant.file_ids.is_empty() {
            body["tool_resources"] = json!({
                "file_search": {
                    "vector_stores": [{ "file_ids": assistant.file_ids }]
                }
            });
        }

        let response = self
            .client
            .post(self.url("assistants"))
            .json(&body)
            .send()
            .await?;

        decode(response, None).await
    }

    async fn upload_file(&self, path: &Path) -> AssistantResult<UploadedFile> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AssistantError::provider(format!("Failed to read {}: {e}", path.display()))
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(filename));

        let response = self
            .client
            .post(self.url("files"))
            .multipart(form)
            .send()
            .await?;

        decode(response, None).await
    }
}
