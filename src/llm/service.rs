//! The model capability the diagnosis workflow consumes.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::LlmError;
use super::prompts;
use super::{ChatMessage, ChatOptions, EmbeddingClient, LlmClient};
use crate::config::LlmConfig;
use crate::workflow::{DiagnosisResult, ErrorType, JobInfo, RetrievedContext};

/// Embedding, classification and structured diagnosis behind one seam.
#[async_trait]
pub trait DiagnosisModel: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Assign one label from the closed error-type set.
    async fn classify_error(&self, error_message: &str) -> anyhow::Result<ErrorType>;

    /// Produce a root cause and fix for `job`, using `context` as reference material.
    async fn generate_diagnosis(
        &self,
        job: &JobInfo,
        context: Option<&RetrievedContext>,
    ) -> anyhow::Result<DiagnosisResult>;
}

/// `DiagnosisModel` over an OpenAI-compatible chat endpoint and embeddings endpoint.
pub struct LlmService {
    client: Arc<dyn LlmClient>,
    embeddings: EmbeddingClient,
    model: String,
    temperature: f64,
    max_tokens: u64,
}

impl LlmService {
    pub fn new(client: Arc<dyn LlmClient>, embeddings: EmbeddingClient, config: &LlmConfig) -> Self {
        Self {
            client,
            embeddings,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Build the OpenAI clients described by `config`.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = super::OpenAiClient::new(&config.base_url, config.api_key.clone(), config.timeout)?;
        let embeddings = EmbeddingClient::new(
            &config.base_url,
            config.api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_dim,
            config.timeout,
        )?;
        Ok(Self::new(Arc::new(client), embeddings, config))
    }
}

#[async_trait]
impl DiagnosisModel for LlmService {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.embeddings.embed(text).await?)
    }

    async fn classify_error(&self, error_message: &str) -> anyhow::Result<ErrorType> {
        let messages = [ChatMessage::user(prompts::classification_prompt(error_message))];
        let options = ChatOptions {
            temperature: Some(0.0),
            max_tokens: Some(50),
            response_format: None,
        };

        let response = self
            .client
            .chat_completion(&self.model, &messages, options)
            .await?;
        let label = response.content.unwrap_or_default();
        let error_type = ErrorType::from_label(&label);

        if error_type == ErrorType::Other && label.trim().to_lowercase() != "other" {
            tracing::debug!(label = %label.trim(), "Unrecognized error label, using other");
        }
        tracing::info!(error_type = %error_type, "Error classified");
        Ok(error_type)
    }

    async fn generate_diagnosis(
        &self,
        job: &JobInfo,
        context: Option<&RetrievedContext>,
    ) -> anyhow::Result<DiagnosisResult> {
        let messages = [
            ChatMessage::system(prompts::DIAGNOSIS_SYSTEM_PROMPT),
            ChatMessage::user(prompts::diagnosis_user_prompt(job, context)),
        ];
        let options = ChatOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            response_format: Some(prompts::diagnosis_response_format()),
        };

        let response = self
            .client
            .chat_completion(&self.model, &messages, options)
            .await?;
        let content = response
            .content
            .ok_or_else(|| LlmError::parse_error("Empty diagnosis response".to_string()))?;
        let diagnosis = parse_diagnosis(&content)?;

        tracing::info!(
            job_id = %job.job_id,
            confidence = diagnosis.confidence,
            priority = %diagnosis.priority,
            "Diagnosis generated"
        );
        Ok(diagnosis)
    }
}

/// Parse and validate a structured diagnosis reply.
pub(crate) fn parse_diagnosis(content: &str) -> Result<DiagnosisResult, LlmError> {
    let body = strip_code_fence(content);
    let diagnosis: DiagnosisResult = serde_json::from_str(body)
        .map_err(|e| LlmError::parse_error(format!("Invalid diagnosis JSON: {}", e)))?;

    if !(0.0..=1.0).contains(&diagnosis.confidence) {
        return Err(LlmError::parse_error(format!(
            "Diagnosis confidence out of range: {}",
            diagnosis.confidence
        )));
    }
    Ok(diagnosis)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
