//! Chat backend capability interface and providers

use super::ChatError;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the OpenAI-compatible API key.
pub const OPENAI_API_KEY_ENV: &str = "SOUNDCLASH_OPENAI_API_KEY";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const USER_AGENT: &str = concat!("soundclash/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub text: String,
    pub max_tokens: u32,
    pub stop: Vec<String>,
    pub seed: Option<u64>,
    pub force_json: bool,
}

impl ChatRequest {
    pub fn new(text: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            text: text.into(),
            max_tokens,
            stop: Vec::new(),
            seed: None,
            force_json: false,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn force_json(mut self) -> Self {
        self.force_json = true;
        self
    }
}

/// A chat completion provider.
#[async_trait]
pub trait ChatBackend: Send + Sync + std::fmt::Debug {
    /// Stable identifier for logging.
    fn id(&self) -> &str;

    async fn complete(&self, request: ChatRequest) -> std::result::Result<String, ChatError>;
}

/// Resolve a `route_config` identifier to a backend instance.
///
/// Known configs: `gpt4o-v0` (OpenAI gpt-4o with JSON mode).
pub fn resolve_backend(route_config: &str) -> Result<Arc<dyn ChatBackend>> {
    match route_config {
        "gpt4o-v0" => Ok(Arc::new(OpenAiBackend::from_env("gpt-4o")?)),
        other => Err(Error::Config(format!(
            "unknown route config '{}'",
            other
        ))),
    }
}

/// OpenAI-compatible chat completion client.
#[derive(Debug)]
pub struct OpenAiBackend {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    id: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("chat HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            id: format!("openai-{}", model),
            model,
        })
    }

    /// Build from the `SOUNDCLASH_OPENAI_API_KEY` environment variable.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var(OPENAI_API_KEY_ENV).map_err(|_| {
            Error::Config(format!("{} is not set", OPENAI_API_KEY_ENV))
        })?;
        Self::new(model, api_key)
    }

    /// Point at a non-default endpoint (proxies, compatible providers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, request: ChatRequest) -> std::result::Result<String, ChatError> {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.text}],
            "max_tokens": request.max_tokens,
        });
        if !request.stop.is_empty() {
            body["stop"] = json!(request.stop);
        }
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }
        if request.force_json {
            body["response_format"] = json!({"type": "json_object"});
        }

        tracing::debug!(backend = %self.id, max_tokens = request.max_tokens, "chat completion request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::Backend(format!(
                "chat provider returned {}: {}",
                status, text
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Backend(format!("malformed provider response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ChatError::Backend("provider response had no content".to_string()))
    }
}
