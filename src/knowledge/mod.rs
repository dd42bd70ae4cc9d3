//! Knowledge store: vector search over historical cases and Flink documentation.
//!
//! Two backends implement [`KnowledgeStore`]:
//! - [`SupabaseKnowledgeStore`]: pgvector behind PostgREST
//! - [`InMemoryKnowledgeStore`]: brute-force cosine index, used when no vector
//!   backend is configured

mod memory;
mod pattern;
mod supabase;

pub use memory::InMemoryKnowledgeStore;
pub use pattern::{generalize_error_pattern, MAX_PATTERN_CHARS};
pub use supabase::SupabaseKnowledgeStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::VectorConfig;
use crate::workflow::{RetrievedCase, RetrievedDoc};

/// Where a knowledge case came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Manual,
    Auto,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "auto" => Self::Auto,
            _ => Self::Manual,
        }
    }
}

/// A stored (pattern, root cause, solution) triple. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeCase {
    pub case_id: String,
    pub error_type: String,
    pub error_pattern: String,
    pub root_cause: String,
    pub solution: String,
    pub source_exception_id: Option<i64>,
    pub source_type: SourceType,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// A documentation snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDoc {
    pub doc_id: String,
    pub title: String,
    pub content: String,
    pub doc_url: Option<String>,
    pub category: Option<String>,
}

/// Entity counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub cases: u64,
    pub docs: u64,
}

/// `case_` followed by 12 hex characters.
pub fn new_case_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("case_{}", &hex[..12])
}

/// Vector similarity search and append-only inserts over the cases and docs collections.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Most similar cases first, optionally restricted to one error type.
    async fn search_cases(
        &self,
        embedding: &[f32],
        error_type: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<RetrievedCase>>;

    /// Most similar docs first, optionally restricted to one category.
    async fn search_docs(
        &self,
        embedding: &[f32],
        category: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<RetrievedDoc>>;

    async fn insert_case(&self, case: &KnowledgeCase, embedding: &[f32]) -> anyhow::Result<()>;

    async fn insert_doc(&self, doc: &KnowledgeDoc, embedding: &[f32]) -> anyhow::Result<()>;

    async fn collection_stats(&self) -> anyhow::Result<CollectionStats>;
}

/// Pick the backend described by `config`.
pub fn from_config(config: &VectorConfig) -> Arc<dyn KnowledgeStore> {
    match (&config.supabase_url, &config.supabase_service_role_key) {
        (Some(url), Some(key)) if config.is_remote() => {
            tracing::info!(url = %url, "Using Supabase pgvector knowledge store");
            Arc::new(SupabaseKnowledgeStore::new(
                url,
                key,
                &config.cases_collection,
                &config.docs_collection,
            ))
        }
        _ => {
            tracing::warn!(
                "SUPABASE_URL/SUPABASE_SERVICE_ROLE_KEY not set, knowledge store is in-memory and not persisted"
            );
            Arc::new(InMemoryKnowledgeStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_ids_have_fixed_shape() {
        let id = new_case_id();
        assert!(id.starts_with("case_"));
        assert_eq!(id.len(), 17);
        assert!(id[5..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_case_id());
    }

    #[test]
    fn source_type_round_trips_through_str() {
        assert_eq!(SourceType::from_str_lossy(SourceType::Auto.as_str()), SourceType::Auto);
        assert_eq!(SourceType::from_str_lossy("manual"), SourceType::Manual);
    }
}
