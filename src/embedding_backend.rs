use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Bounded retry with linear backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        self.base_delay * (attempt as u32 + 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbedTextRequest<'a> {
    model: &'a str,
    inputs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Embeddings { embeddings: Vec<Vec<f32>> },
    Vectors { vectors: Vec<Vec<f32>> },
    Data { data: Vec<EmbeddingData> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
            EmbeddingResponse::Vectors { vectors } => vectors,
            EmbeddingResponse::Data { data } => data.into_iter().map(|d| d.embedding).collect(),
        }
    }
}

/// Parse a service base URL so relative joins keep its path prefix
pub(crate) fn parse_base_url(raw: &str) -> std::result::Result<Url, url::ParseError> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// HTTP client for a text embedding service
pub struct EmbeddingBackendClient {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl EmbeddingBackendClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let base_url = parse_base_url(base_url).map_err(|e| {
            Error::Configuration(format!("Invalid embedding backend URL '{}': {}", base_url, e))
        })?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            retry,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Configuration(format!("Invalid embedding backend URL: {}", e)))
    }

    /// Send a request, retrying transport and HTTP status failures.
    ///
    /// Exhausting the policy is a provider problem, reported as `Configuration`.
    async fn send_with_retry<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let mut last_err = String::from("embedding backend request failed");
        for attempt in 0..=self.retry.max_retries {
            let req = request.try_clone().ok_or_else(|| {
                Error::Configuration("Failed to clone embedding backend request".to_string())
            })?;
            match req.send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(ok) => match ok.json::<T>().await {
                        Ok(parsed) => return Ok(parsed),
                        Err(e) => last_err = format!("invalid response body: {}", e),
                    },
                    Err(e) => last_err = e.to_string(),
                },
                Err(e) => last_err = e.to_string(),
            }

            if attempt < self.retry.max_retries {
                let delay = self.retry.delay_for(attempt);
                debug!(
                    attempt = attempt + 1,
                    ?delay,
                    error = %last_err,
                    "Retrying embedding request"
                );
                tokio::time::sleep(delay).await;
            }
        }

        warn!(
            attempts = self.retry.max_retries + 1,
            error = %last_err,
            "Embedding backend unavailable"
        );
        Err(Error::Configuration(format!(
            "embedding backend at {} failed after {} attempts: {}",
            self.base_url,
            self.retry.max_retries + 1,
            last_err
        )))
    }

    pub async fn embed_text(&self, model: &str, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint("v1/embed/text")?;
        let request = EmbedTextRequest { model, inputs };
        let parsed: EmbeddingResponse = self
            .send_with_retry(self.client.post(url).json(&request))
            .await?;
        Ok(parsed.into_embeddings())
    }
}
