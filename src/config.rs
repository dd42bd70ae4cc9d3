//! Configuration management for the Oceanus diagnosis agent.
//!
//! Configuration is read from environment variables:
//! - `OPENAI_API_KEY` - Required by processes that call the model.
//! - `OPENAI_BASE_URL` - Optional. OpenAI-compatible endpoint. Defaults to `https://api.openai.com/v1`.
//! - `OPENAI_MODEL` - Optional. Chat model. Defaults to `gpt-4o-mini`.
//! - `OPENAI_EMBEDDING_MODEL` - Optional. Defaults to `text-embedding-3-small`.
//! - `OPENAI_TEMPERATURE`, `OPENAI_MAX_TOKENS`, `OPENAI_TIMEOUT_SECS`, `OPENAI_EMBEDDING_DIM`
//! - `DATABASE_PATH` - Optional. SQLite file holding the exception queue. Defaults to `./data/oceanus.db`.
//! - `DATABASE_BUSY_TIMEOUT_MS` - Optional. Defaults to `5000`.
//! - `SUPABASE_URL` / `SUPABASE_SERVICE_ROLE_KEY` - Optional. pgvector knowledge store.
//! - `VECTOR_CASES_COLLECTION` / `VECTOR_DOCS_COLLECTION` - Optional collection names.
//! - `SCHEDULER_INTERVAL_SECONDS` / `SCHEDULER_BATCH_SIZE` - Batch runner tunables.
//! - `KNOWLEDGE_CONFIDENCE_THRESHOLD` / `KNOWLEDGE_MAX_SIMILAR_CASES` / `KNOWLEDGE_MAX_DOC_SNIPPETS`
//! - `WORKFLOW_MAX_DIAGNOSE_RETRIES` - Optional. Defaults to `3`.
//! - `HOST` / `PORT` / `APP_ENV` - HTTP server settings.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deployment environment reported by the health endpoint
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            environment: "development".to_string(),
        }
    }
}

/// Relational store configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// How long a writer waits for a competing claimant before failing
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/oceanus.db"),
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Language model endpoint configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub timeout: Duration,
    /// Embedding dimension (must match model output)
    pub embedding_dim: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.1,
            max_tokens: 2000,
            timeout: Duration::from_secs(60),
            embedding_dim: 1536,
        }
    }
}

/// Vector store configuration.
#[derive(Debug, Clone)]
pub struct VectorConfig {
    /// Supabase project URL
    pub supabase_url: Option<String>,
    /// Supabase service role key (for full access)
    pub supabase_service_role_key: Option<String>,
    pub cases_collection: String,
    pub docs_collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_service_role_key: None,
            cases_collection: "flink_cases".to_string(),
            docs_collection: "flink_docs".to_string(),
        }
    }
}

impl VectorConfig {
    /// Check if the remote vector store is configured.
    pub fn is_remote(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        set(&self.supabase_url) && set(&self.supabase_service_role_key)
    }
}

/// Batch scheduling configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 10,
        }
    }
}

/// Knowledge retrieval and accumulation configuration.
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Minimum diagnosis confidence for folding a case back into the store
    pub confidence_threshold: f64,
    pub max_similar_cases: usize,
    pub max_doc_snippets: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            max_similar_cases: 3,
            max_doc_snippets: 3,
        }
    }
}

/// Workflow engine configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Diagnose attempts before the run is forced into FAILED
    pub max_diagnose_retries: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_diagnose_retries: 3,
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub vector: VectorConfig,
    pub scheduler: SchedulerConfig,
    pub knowledge: KnowledgeConfig,
    pub workflow: WorkflowConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENAI_API_KEY` is not set and
    /// `ConfigError::InvalidValue` if any numeric setting fails to parse or is
    /// out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;
        Self::from_env_with_api_key(api_key)
    }

    /// Load configuration for processes that never call the model (debug tooling).
    pub fn from_env_without_llm() -> Result<Self, ConfigError> {
        Self::from_env_with_api_key(std::env::var("OPENAI_API_KEY").unwrap_or_default())
    }

    fn from_env_with_api_key(api_key: String) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let server = ServerConfig {
            host: env_or("HOST", defaults.server.host),
            port: parse_env("PORT", defaults.server.port)?,
            environment: env_or("APP_ENV", defaults.server.environment),
        };

        let database = DatabaseConfig {
            path: std::env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database.path),
            busy_timeout: Duration::from_millis(parse_env(
                "DATABASE_BUSY_TIMEOUT_MS",
                defaults.database.busy_timeout.as_millis() as u64,
            )?),
        };

        let llm = LlmConfig {
            api_key,
            base_url: env_or("OPENAI_BASE_URL", defaults.llm.base_url)
                .trim_end_matches('/')
                .to_string(),
            model: env_or("OPENAI_MODEL", defaults.llm.model),
            embedding_model: env_or("OPENAI_EMBEDDING_MODEL", defaults.llm.embedding_model),
            temperature: parse_env("OPENAI_TEMPERATURE", defaults.llm.temperature)?,
            max_tokens: parse_env("OPENAI_MAX_TOKENS", defaults.llm.max_tokens)?,
            timeout: Duration::from_secs(parse_env(
                "OPENAI_TIMEOUT_SECS",
                defaults.llm.timeout.as_secs(),
            )?),
            embedding_dim: parse_env("OPENAI_EMBEDDING_DIM", defaults.llm.embedding_dim)?,
        };

        let vector = VectorConfig {
            supabase_url: std::env::var("SUPABASE_URL").ok(),
            supabase_service_role_key: std::env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
            cases_collection: env_or("VECTOR_CASES_COLLECTION", defaults.vector.cases_collection),
            docs_collection: env_or("VECTOR_DOCS_COLLECTION", defaults.vector.docs_collection),
        };

        let scheduler = SchedulerConfig {
            interval: Duration::from_secs(parse_env(
                "SCHEDULER_INTERVAL_SECONDS",
                defaults.scheduler.interval.as_secs(),
            )?),
            batch_size: parse_env("SCHEDULER_BATCH_SIZE", defaults.scheduler.batch_size)?,
        };

        let knowledge = KnowledgeConfig {
            confidence_threshold: parse_env(
                "KNOWLEDGE_CONFIDENCE_THRESHOLD",
                defaults.knowledge.confidence_threshold,
            )?,
            max_similar_cases: parse_env(
                "KNOWLEDGE_MAX_SIMILAR_CASES",
                defaults.knowledge.max_similar_cases,
            )?,
            max_doc_snippets: parse_env(
                "KNOWLEDGE_MAX_DOC_SNIPPETS",
                defaults.knowledge.max_doc_snippets,
            )?,
        };

        let workflow = WorkflowConfig {
            max_diagnose_retries: parse_env(
                "WORKFLOW_MAX_DIAGNOSE_RETRIES",
                defaults.workflow.max_diagnose_retries,
            )?,
        };

        let config = Self {
            server,
            database,
            llm,
            vector,
            scheduler,
            knowledge,
            workflow,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that parsing alone cannot catch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.knowledge.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue(
                "KNOWLEDGE_CONFIDENCE_THRESHOLD".to_string(),
                format!("{} is outside [0, 1]", threshold),
            ));
        }
        if self.workflow.max_diagnose_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "WORKFLOW_MAX_DIAGNOSE_RETRIES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.scheduler.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "SCHEDULER_INTERVAL_SECONDS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.knowledge.max_similar_cases, 3);
        assert_eq!(config.workflow.max_diagnose_retries, 3);
        assert!(!config.vector.is_remote());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = Config::default();
        config.knowledge.confidence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(key, _)) if key == "KNOWLEDGE_CONFIDENCE_THRESHOLD"
        ));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = Config::default();
        config.workflow.max_diagnose_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_reports_key() {
        std::env::set_var("OCEANUS_TEST_PARSE_PORT", "not-a-port");
        let err = parse_env::<u16>("OCEANUS_TEST_PARSE_PORT", 1).unwrap_err();
        assert!(err.to_string().contains("OCEANUS_TEST_PARSE_PORT"));
        std::env::remove_var("OCEANUS_TEST_PARSE_PORT");

        assert_eq!(parse_env::<u16>("OCEANUS_TEST_UNSET_KEY", 7).unwrap(), 7);
    }
}
