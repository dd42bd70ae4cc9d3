//! In-memory knowledge store (non-persistent).

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{CollectionStats, KnowledgeCase, KnowledgeDoc, KnowledgeStore};
use crate::workflow::{RetrievedCase, RetrievedDoc};

#[derive(Clone, Default)]
pub struct InMemoryKnowledgeStore {
    cases: Arc<RwLock<Vec<(KnowledgeCase, Vec<f32>)>>>,
    docs: Arc<RwLock<Vec<(KnowledgeDoc, Vec<f32>)>>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored cases, in insertion order.
    pub async fn cases(&self) -> Vec<KnowledgeCase> {
        self.cases.read().await.iter().map(|(c, _)| c.clone()).collect()
    }
}

/// Cosine similarity; 0 for mismatched or zero-length vectors.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn top_k<T>(mut scored: Vec<(f64, T)>, limit: usize) -> Vec<(f64, T)> {
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(limit);
    scored
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn search_cases(
        &self,
        embedding: &[f32],
        error_type: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<RetrievedCase>> {
        let cases = self.cases.read().await;
        let scored = cases
            .iter()
            .filter(|(case, _)| error_type.map_or(true, |t| case.error_type == t))
            .map(|(case, vector)| (cosine_similarity(embedding, vector), case))
            .collect();

        Ok(top_k(scored, limit)
            .into_iter()
            .map(|(score, case)| RetrievedCase {
                case_id: case.case_id.clone(),
                error_type: case.error_type.clone(),
                error_pattern: case.error_pattern.clone(),
                root_cause: case.root_cause.clone(),
                solution: case.solution.clone(),
                similarity_score: score,
            })
            .collect())
    }

    async fn search_docs(
        &self,
        embedding: &[f32],
        category: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<RetrievedDoc>> {
        let docs = self.docs.read().await;
        let scored = docs
            .iter()
            .filter(|(doc, _)| category.map_or(true, |c| doc.category.as_deref() == Some(c)))
            .map(|(doc, vector)| (cosine_similarity(embedding, vector), doc))
            .collect();

        Ok(top_k(scored, limit)
            .into_iter()
            .map(|(score, doc)| RetrievedDoc {
                doc_id: doc.doc_id.clone(),
                title: doc.title.clone(),
                content: doc.content.clone(),
                doc_url: doc.doc_url.clone(),
                category: doc.category.clone(),
                similarity_score: score,
            })
            .collect())
    }

    async fn insert_case(&self, case: &KnowledgeCase, embedding: &[f32]) -> anyhow::Result<()> {
        let mut cases = self.cases.write().await;
        if cases.iter().any(|(c, _)| c.case_id == case.case_id) {
            anyhow::bail!("Case {} already exists", case.case_id);
        }
        cases.push((case.clone(), embedding.to_vec()));
        Ok(())
    }

    async fn insert_doc(&self, doc: &KnowledgeDoc, embedding: &[f32]) -> anyhow::Result<()> {
        self.docs
            .write()
            .await
            .push((doc.clone(), embedding.to_vec()));
        Ok(())
    }

    async fn collection_stats(&self) -> anyhow::Result<CollectionStats> {
        Ok(CollectionStats {
            cases: self.cases.read().await.len() as u64,
            docs: self.docs.read().await.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SourceType;
    use chrono::Utc;

    fn case(id: &str, error_type: &str) -> KnowledgeCase {
        KnowledgeCase {
            case_id: id.to_string(),
            error_type: error_type.to_string(),
            error_pattern: format!("pattern {}", id),
            root_cause: "cause".to_string(),
            solution: "fix".to_string(),
            source_exception_id: None,
            source_type: SourceType::Manual,
            verified: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_filters() {
        let store = InMemoryKnowledgeStore::new();
        store.insert_case(&case("far", "oom"), &[0.0, 1.0]).await.unwrap();
        store.insert_case(&case("near", "oom"), &[1.0, 0.1]).await.unwrap();
        store
            .insert_case(&case("other", "network"), &[1.0, 0.0])
            .await
            .unwrap();

        let hits = store.search_cases(&[1.0, 0.0], Some("oom"), 5).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.case_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);

        let hits = store.search_cases(&[1.0, 0.0], None, 1).await.unwrap();
        assert_eq!(hits[0].case_id, "other");
    }

    #[tokio::test]
    async fn duplicate_case_id_rejected() {
        let store = InMemoryKnowledgeStore::new();
        store.insert_case(&case("a", "oom"), &[1.0]).await.unwrap();
        assert!(store.insert_case(&case("a", "oom"), &[1.0]).await.is_err());
        assert_eq!(store.collection_stats().await.unwrap().cases, 1);
    }

    #[tokio::test]
    async fn docs_filter_by_category() {
        let store = InMemoryKnowledgeStore::new();
        let doc = KnowledgeDoc {
            doc_id: "d1".to_string(),
            title: "Checkpointing".to_string(),
            content: "Tuning checkpoints".to_string(),
            doc_url: Some("https://flink.apache.org".to_string()),
            category: Some("checkpoint".to_string()),
        };
        store.insert_doc(&doc, &[1.0, 0.0]).await.unwrap();

        assert_eq!(store.search_docs(&[1.0, 0.0], Some("checkpoint"), 3).await.unwrap().len(), 1);
        assert!(store.search_docs(&[1.0, 0.0], Some("memory"), 3).await.unwrap().is_empty());
    }
}
