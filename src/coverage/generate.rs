use crate::config::Config;
use crate::embedding_backend::parse_base_url;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Text generation with a token budget
#[async_trait]
pub trait Generator: Send + Sync {
    /// Raises `Error::Configuration` when no provider is usable
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String>;
}

/// Used when no generation endpoint is configured
pub struct NotConfiguredGenerator;

#[async_trait]
impl Generator for NotConfiguredGenerator {
    async fn generate(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
        Err(Error::Configuration(
            "generation endpoint is not configured".to_string(),
        ))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
pub struct HttpGenerator {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base = parse_base_url(base_url).map_err(|e| {
            Error::Configuration(format!("Invalid generation URL '{}': {}", base_url, e))
        })?;
        let endpoint = base
            .join("v1/chat/completions")
            .map_err(|e| Error::Configuration(format!("Invalid generation URL: {}", e)))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature: 0.2,
        };

        let mut builder = self.client.post(self.endpoint.clone()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!(model = %self.model, max_tokens, "Requesting completion");

        let response = builder
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Configuration(format!("generation request failed: {}", e)))?;
        let parsed: ChatResponse = response.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::Other("generation returned no content".to_string()))
    }
}

/// Build the configured generator, or one that reports "not configured"
pub fn create_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    match config.generation.url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => Ok(Arc::new(HttpGenerator::new(
            url,
            config.generation.model.clone(),
            config.generation_api_key(),
            Duration::from_secs(config.generation.timeout_secs),
        )?)),
        None => Ok(Arc::new(NotConfiguredGenerator)),
    }
}
