use std::sync::Arc;
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    services::retry::RetryPolicy,
};

/// Payload served by [`CannedBackend`] when running offline
pub const CANNED_RECOMMENDATIONS: &str = r#"[{"contentId":"m-789","score":0.98,"reason":"Sci-fi thriller"},{"contentId":"m-234","score":0.85,"reason":"Sci-fi epic"}]"#;

const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// A generative text backend reached over a request/response boundary
///
/// Implementations make exactly one attempt per call. Retrying is the job of
/// [`GenerationClient`].
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Sends `prompt` and returns the backend's raw text output
    async fn complete(&self, prompt: &str) -> AppResult<String>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Ollama `/api/generate` backend
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: HttpClient,
    endpoint: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(endpoint: String, model: String) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(GENERATION_TIMEOUT).build()?;

        Ok(Self {
            http_client,
            endpoint,
            model,
        })
    }
}

#[async_trait::async_trait]
impl GenerationBackend for OllamaBackend {
    async fn complete(&self, prompt: &str) -> AppResult<String> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&OllamaGenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let generated: OllamaGenerateResponse = response.json().await?;
        Ok(generated.response)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

/// Offline backend returning a fixed payload
#[derive(Clone)]
pub struct CannedBackend {
    payload: String,
}

impl Default for CannedBackend {
    fn default() -> Self {
        Self::new(CANNED_RECOMMENDATIONS)
    }
}

impl CannedBackend {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

#[async_trait::async_trait]
impl GenerationBackend for CannedBackend {
    async fn complete(&self, _prompt: &str) -> AppResult<String> {
        Ok(self.payload.clone())
    }

    fn name(&self) -> &'static str {
        "canned"
    }
}

/// Generation client: one backend composed with a retry policy
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    policy: RetryPolicy,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Picks the backend once, at construction. `env=local` never touches
    /// the network.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let backend: Arc<dyn GenerationBackend> = if config.is_local() {
            tracing::info!("Generation backend: canned offline payload");
            Arc::new(CannedBackend::default())
        } else {
            tracing::info!(
                endpoint = %config.ollama_endpoint,
                model = %config.ollama_model,
                "Generation backend: ollama"
            );
            Arc::new(OllamaBackend::new(
                config.ollama_endpoint.clone(),
                config.ollama_model.clone(),
            )?)
        };

        Ok(Self::new(backend, config.retry_policy()))
    }

    /// Client serving [`CANNED_RECOMMENDATIONS`]
    pub fn offline() -> Self {
        Self::new(Arc::new(CannedBackend::default()), RetryPolicy::default())
    }

    /// Sends `prompt` to the backend, retrying transient failures
    #[instrument(skip_all, fields(backend = self.backend.name()))]
    pub async fn generate(&self, prompt: &str) -> AppResult<String> {
        let raw = self
            .policy
            .run(|attempt| {
                tracing::debug!(attempt, "Calling generation backend");
                self.backend.complete(prompt)
            })
            .await?;

        tracing::info!(response_len = raw.len(), "Generation completed");
        Ok(raw)
    }
}
