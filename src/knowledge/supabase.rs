//! pgvector knowledge store accessed through Supabase PostgREST.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use super::{CollectionStats, KnowledgeCase, KnowledgeDoc, KnowledgeStore};
use crate::util::{truncate_chars, vector_literal};
use crate::workflow::{RetrievedCase, RetrievedDoc};

const MAX_CASE_PATTERN_CHARS: usize = 2000;
const MAX_CASE_ROOT_CAUSE_CHARS: usize = 2000;
const MAX_CASE_SOLUTION_CHARS: usize = 4000;
const MAX_DOC_TITLE_CHARS: usize = 512;
const MAX_DOC_CONTENT_CHARS: usize = 8000;

/// Cases and docs live in two tables with an `embedding vector` column; search
/// goes through the `match_<table>` SQL functions, ordered by cosine similarity.
pub struct SupabaseKnowledgeStore {
    client: Client,
    url: String,
    service_role_key: String,
    cases_collection: String,
    docs_collection: String,
}

impl SupabaseKnowledgeStore {
    pub fn new(url: &str, service_role_key: &str, cases_collection: &str, docs_collection: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
            cases_collection: cases_collection.to_string(),
            docs_collection: docs_collection.to_string(),
        }
    }

    fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
    }

    async fn rpc<T: serde::de::DeserializeOwned>(
        &self,
        function: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<T> {
        let resp = self
            .authorized(self.client.post(format!("{}/rpc/{}", self.rest_url(), function)))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            anyhow::bail!("Failed to call {}: {} - {}", function, status, text);
        }

        Ok(serde_json::from_str(&text)?)
    }

    async fn insert(&self, table: &str, body: serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .authorized(self.client.post(format!("{}/{}", self.rest_url(), table)))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            anyhow::bail!("Failed to insert into {}: {} - {}", table, status, text);
        }

        Ok(())
    }

    /// Exact row count, read from PostgREST's `Content-Range` header.
    async fn count(&self, table: &str) -> anyhow::Result<u64> {
        let resp = self
            .authorized(
                self.client
                    .head(format!("{}/{}?select=*", self.rest_url(), table)),
            )
            .header("Prefer", "count=exact")
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("Failed to count {}: {}", table, resp.status());
        }

        resp.headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| anyhow::anyhow!("No row count returned for {}", table))
    }
}

/// Parse the total from `0-24/3573` or `*/0`.
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

#[derive(Debug, Deserialize)]
struct CaseMatch {
    case_id: String,
    error_type: String,
    error_pattern: String,
    root_cause: String,
    solution: String,
    similarity: f64,
}

#[derive(Debug, Deserialize)]
struct DocMatch {
    doc_id: String,
    title: String,
    content: String,
    doc_url: Option<String>,
    category: Option<String>,
    similarity: f64,
}

#[async_trait]
impl KnowledgeStore for SupabaseKnowledgeStore {
    async fn search_cases(
        &self,
        embedding: &[f32],
        error_type: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<RetrievedCase>> {
        let body = serde_json::json!({
            "query_embedding": vector_literal(embedding),
            "match_count": limit,
            "filter_error_type": error_type,
        });

        let matches: Vec<CaseMatch> = self
            .rpc(&format!("match_{}", self.cases_collection), body)
            .await?;

        Ok(matches
            .into_iter()
            .map(|m| RetrievedCase {
                case_id: m.case_id,
                error_type: m.error_type,
                error_pattern: m.error_pattern,
                root_cause: m.root_cause,
                solution: m.solution,
                similarity_score: m.similarity,
            })
            .collect())
    }

    async fn search_docs(
        &self,
        embedding: &[f32],
        category: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<RetrievedDoc>> {
        let body = serde_json::json!({
            "query_embedding": vector_literal(embedding),
            "match_count": limit,
            "filter_category": category,
        });

        let matches: Vec<DocMatch> = self
            .rpc(&format!("match_{}", self.docs_collection), body)
            .await?;

        Ok(matches
            .into_iter()
            .map(|m| RetrievedDoc {
                doc_id: m.doc_id,
                title: m.title,
                content: m.content,
                doc_url: m.doc_url,
                category: m.category,
                similarity_score: m.similarity,
            })
            .collect())
    }

    async fn insert_case(&self, case: &KnowledgeCase, embedding: &[f32]) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "case_id": case.case_id,
            "error_type": case.error_type,
            "error_pattern": truncate_chars(&case.error_pattern, MAX_CASE_PATTERN_CHARS),
            "root_cause": truncate_chars(&case.root_cause, MAX_CASE_ROOT_CAUSE_CHARS),
            "solution": truncate_chars(&case.solution, MAX_CASE_SOLUTION_CHARS),
            "embedding": vector_literal(embedding),
        });

        self.insert(&self.cases_collection, body).await?;
        tracing::debug!(case_id = %case.case_id, "Inserted case vector");
        Ok(())
    }

    async fn insert_doc(&self, doc: &KnowledgeDoc, embedding: &[f32]) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "doc_id": doc.doc_id,
            "title": truncate_chars(&doc.title, MAX_DOC_TITLE_CHARS),
            "content": truncate_chars(&doc.content, MAX_DOC_CONTENT_CHARS),
            "doc_url": doc.doc_url,
            "category": doc.category,
            "embedding": vector_literal(embedding),
        });

        self.insert(&self.docs_collection, body).await?;
        tracing::debug!(doc_id = %doc.doc_id, "Inserted doc vector");
        Ok(())
    }

    async fn collection_stats(&self) -> anyhow::Result<CollectionStats> {
        Ok(CollectionStats {
            cases: self.count(&self.cases_collection).await?,
            docs: self.count(&self.docs_collection).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_total() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn case_match_deserializes_rpc_row() {
        let row = r#"{"case_id":"case_0123456789ab","error_type":"oom","error_pattern":"heap",
            "root_cause":"small heap","solution":"raise it","similarity":0.91}"#;
        let parsed: CaseMatch = serde_json::from_str(row).unwrap();
        assert_eq!(parsed.case_id, "case_0123456789ab");
        assert!((parsed.similarity - 0.91).abs() < f64::EPSILON);
    }

    #[test]
    fn rest_url_strips_trailing_slash() {
        let store = SupabaseKnowledgeStore::new("https://x.supabase.co/", "k", "flink_cases", "flink_docs");
        assert_eq!(store.rest_url(), "https://x.supabase.co/rest/v1");
    }
}
