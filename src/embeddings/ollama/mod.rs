
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{Embedder, prepare_input};
use crate::VaultError;
use crate::analyzer::ChatProvider;
use crate::config::Config;

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Blocking client for an Ollama-compatible server
///
/// Serves both the embedding model and the chat model. The async trait
/// implementations move each call onto the blocking pool and bound it with an
/// overall deadline.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    chat_model: String,
    agent: ureq::Agent,
    request_timeout: Duration,
    retry_attempts: u32,
    backoff: Duration,
    max_input_chars: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub format: Option<String>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;
        let request_timeout = config.ollama.request_timeout();

        Ok(Self {
            base_url,
            embedding_model: config.ollama.embedding_model.clone(),
            chat_model: config.ollama.chat_model.clone(),
            agent: build_agent(request_timeout),
            request_timeout,
            retry_attempts: config.ollama.retry_attempts,
            backoff: DEFAULT_BACKOFF,
            max_input_chars: config.ollama.max_input_chars,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self.request_timeout = timeout;
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay before the first retry; doubles on each further attempt
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    #[inline]
    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    /// Test connection to the server and verify both models are available
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;
        for model in [&self.embedding_model, &self.chat_model] {
            if !models.iter().any(|m| model_matches(&m.name, model)) {
                let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
                warn!("Model {} not found. Available models: {:?}", model, available);
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    model,
                    available
                ));
            }
        }

        info!(
            "Health check passed for Ollama server at {} with models {} and {}",
            self.base_url, self.embedding_model, self.chat_model
        );
        Ok(())
    }

    /// Ping the server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        self.list_models().context("Failed to ping Ollama server")?;
        debug!("Server ping successful");
        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate an embedding for one text input
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request_json = serde_json::to_string(&EmbedRequest {
            model: &self.embedding_model,
            prompt: text,
        })
        .context("Failed to serialize embedding request")?;

        let response_text = self
            .post_json("/api/embeddings", &request_json)
            .context("Failed to generate embedding")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if embed_response.embedding.is_empty() {
            return Err(anyhow::anyhow!(
                "Model '{}' returned an empty embedding",
                self.embedding_model
            ));
        }

        debug!(
            "Generated embedding with {} dimensions",
            embed_response.embedding.len()
        );
        Ok(embed_response.embedding)
    }

    /// Run a non-streaming completion against the chat model
    #[inline]
    pub fn generate(&self, prompt: &str, system: &str, json: bool) -> Result<String> {
        debug!(
            "Generating completion with {} (prompt length: {})",
            self.chat_model,
            prompt.len()
        );

        let request_json = serde_json::to_string(&GenerateRequest {
            model: &self.chat_model,
            prompt,
            system,
            stream: false,
            format: json.then_some("json"),
        })
        .context("Failed to serialize generate request")?;

        let response_text = self
            .post_json("/api/generate", &request_json)
            .context("Failed to generate completion")?;

        let response: GenerateResponse =
            serde_json::from_str(&response_text).context("Failed to parse generate response")?;

        debug!("Completion returned {} chars", response.response.len());
        Ok(response.response)
    }

    fn post_json(&self, endpoint: &str, body: &str) -> Result<String> {
        let url = self
            .base_url
            .join(endpoint)
            .with_context(|| format!("Failed to build {} URL", endpoint))?;

        self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = self.backoff_delay(attempt);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt.saturating_sub(1))
    }

    /// Upper bound for one logical call including every retry and backoff
    fn overall_timeout(&self) -> Duration {
        let backoff: Duration = (1..self.retry_attempts)
            .map(|attempt| self.backoff_delay(attempt))
            .sum();
        self.request_timeout * self.retry_attempts + backoff
    }

    /// Run a blocking client call on the blocking pool under the overall deadline
    async fn run_blocking<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T> + Send + 'static,
    {
        let client = self.clone();
        let deadline = self.overall_timeout();

        match tokio::time::timeout(deadline, tokio::task::spawn_blocking(move || call(client)))
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(anyhow::anyhow!("Provider task failed: {}", join_error)),
            Err(_) => Err(anyhow::anyhow!(
                "Provider call timed out after {:?}",
                deadline
            )),
        }
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        let input = prepare_input(text, self.max_input_chars)?.to_string();

        self.run_blocking(move |client| client.generate_embedding(&input))
            .await
            .map_err(|e| VaultError::EmbeddingProvider(format!("{:#}", e)))
    }
}

#[async_trait]
impl ChatProvider for OllamaClient {
    async fn complete(&self, system: &str, prompt: &str) -> crate::Result<String> {
        let system = system.to_string();
        let prompt = prompt.to_string();

        self.run_blocking(move |client| client.generate(&prompt, &system, true))
            .await
            .map_err(|e| VaultError::LanguageModelProvider(format!("{:#}", e)))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// `nomic-embed-text` matches `nomic-embed-text:latest`
fn model_matches(available: &str, wanted: &str) -> bool {
    available == wanted
        || (!wanted.contains(':') && available.strip_suffix(":latest") == Some(wanted))
}
