//! OpenAI-compatible embedding client.
//!
//! [`OpenAiEmbedder`] implements the core [`Embedder`] trait by calling
//! `POST {base_url}/embeddings`. The API key is read from `OPENAI_API_KEY`
//! once, at construction.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Every failure surfaces as [`EngineError::ScoringBackend`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use knowledge_engine_core::embedding::Embedder;
use knowledge_engine_core::{EngineError, Result};

use crate::config::EmbeddingConfig;

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .context("embedding.model required for OpenAI provider")?;
        let dims = config
            .dims
            .context("embedding.dims required for OpenAI provider")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            EngineError::scoring(format!("invalid embedding response: {}", e))
                        })?;
                        return parse_response(&json, texts.len(), self.dims);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err =
                        EngineError::scoring(format!("embedding API error {}: {}", status, body_text));

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(EngineError::scoring(format!("embedding request failed: {}", e)));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| EngineError::scoring("embedding failed after retries")))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

/// Extract `data[].embedding` in input order.
///
/// Items are placed by their `index` field when present. The vector count
/// must equal `expected` and every vector must have `dims` entries.
fn parse_response(json: &serde_json::Value, expected: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EngineError::scoring("invalid embedding response: missing data array"))?;

    if data.len() != expected {
        return Err(EngineError::scoring(format!(
            "embedding response has {} vectors, expected {}",
            data.len(),
            expected
        )));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];

    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);

        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EngineError::scoring("invalid embedding response: missing embedding"))?;

        let vec = embedding
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| EngineError::scoring("invalid embedding response: non-numeric value"))?;

        if vec.len() != dims {
            return Err(EngineError::scoring(format!(
                "embedding has {} dimensions, expected {}",
                vec.len(),
                dims
            )));
        }

        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(vec),
            _ => {
                return Err(EngineError::scoring(format!(
                    "invalid embedding response: bad index {}",
                    index
                )))
            }
        }
    }

    slots
        .into_iter()
        .map(|s| s.ok_or_else(|| EngineError::scoring("invalid embedding response: missing index")))
        .collect()
}

/// Build the configured embedder, or `None` when embeddings are disabled.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Option<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAiEmbedder::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
