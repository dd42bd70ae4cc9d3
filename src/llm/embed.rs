//! Embedding client for OpenAI-compatible `/embeddings` endpoints.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{execute_with_retry, LlmError, RetryConfig};
use crate::util::truncate_chars;

/// Inputs longer than this are cut before embedding to stay under token limits.
const MAX_EMBED_INPUT_CHARS: usize = 8000;

/// Client for generating embeddings.
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    retry_config: RetryConfig,
}

impl EmbeddingClient {
    /// Create a new embedding client.
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        dimension: usize,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimension,
            retry_config: RetryConfig::default(),
        })
    }

    /// Get the configured embedding dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Get the configured model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate embedding for a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: vec![truncate_chars(text, MAX_EMBED_INPUT_CHARS).to_string()],
        };

        let mut embeddings = execute_with_retry(&self.retry_config, "embedding", || {
            self.execute_request(&request)
        })
        .await?;

        let embedding = embeddings
            .pop()
            .ok_or_else(|| LlmError::parse_error("No embedding returned".to_string()))?;

        if embedding.len() != self.dimension {
            tracing::warn!(
                got = embedding.len(),
                expected = self.dimension,
                "Embedding dimension mismatch"
            );
        }

        Ok(embedding)
    }

    async fn execute_request(&self, request: &EmbeddingRequest) -> Result<Vec<Vec<f32>>, LlmError> {
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(LlmError::from_reqwest)?;

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &text, None));
        }

        parse_embeddings(&text)
    }
}

/// Parse an embeddings response, ordering vectors by their input index.
fn parse_embeddings(body: &str) -> Result<Vec<Vec<f32>>, LlmError> {
    let response: EmbeddingResponse = serde_json::from_str(body).map_err(|e| {
        LlmError::parse_error(format!("Failed to parse embedding response: {} - {}", e, body))
    })?;

    let mut data = response.data;
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
