//! In-memory exception queue (non-persistent).

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    diagnosis_payload, failure_payload, now_string, ExceptionQueue, ExceptionRecord,
    ExceptionStatus, NewException,
};
use crate::knowledge::KnowledgeCase;
use crate::workflow::{DiagnosisResult, JobInfo};

#[derive(Default)]
struct Tables {
    exceptions: Vec<ExceptionRecord>,
    cases: Vec<KnowledgeCase>,
    next_id: i64,
}

#[derive(Clone, Default)]
pub struct InMemoryExceptionQueue {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryExceptionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored knowledge-case metadata.
    pub async fn cases(&self) -> Vec<KnowledgeCase> {
        self.tables.read().await.cases.clone()
    }

    fn finish(
        tables: &mut Tables,
        exception_id: i64,
        status: ExceptionStatus,
        payload: serde_json::Value,
        confidence: Option<f64>,
    ) -> anyhow::Result<()> {
        let record = tables
            .exceptions
            .iter_mut()
            .find(|r| r.id == exception_id)
            .ok_or_else(|| anyhow::anyhow!("Exception {} not found", exception_id))?;
        record.status = status;
        record.suggested_fix = Some(payload);
        if confidence.is_some() {
            record.diagnosis_confidence = confidence;
        }
        record.diagnosed_at = Some(now_string());
        Ok(())
    }
}

#[async_trait]
impl ExceptionQueue for InMemoryExceptionQueue {
    async fn claim_pending(&self) -> anyhow::Result<Option<JobInfo>> {
        let mut tables = self.tables.write().await;
        // Insertion order is creation order.
        let Some(record) = tables
            .exceptions
            .iter_mut()
            .find(|r| r.status == ExceptionStatus::Pending)
        else {
            return Ok(None);
        };
        record.status = ExceptionStatus::InProgress;
        Ok(Some(record.to_job_info()))
    }

    async fn complete(
        &self,
        exception_id: i64,
        diagnosis: &DiagnosisResult,
        status: ExceptionStatus,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        Self::finish(
            &mut tables,
            exception_id,
            status,
            diagnosis_payload(diagnosis),
            Some(diagnosis.confidence),
        )
    }

    async fn mark_failed(&self, exception_id: i64, message: &str) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        Self::finish(
            &mut tables,
            exception_id,
            ExceptionStatus::Failed,
            failure_payload(message),
            None,
        )
    }

    async fn insert_case(&self, case: &KnowledgeCase) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        if tables.cases.iter().any(|c| c.case_id == case.case_id) {
            anyhow::bail!("Knowledge case {} already exists", case.case_id);
        }
        tables.cases.push(case.clone());
        Ok(())
    }

    async fn count_pending(&self) -> anyhow::Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .exceptions
            .iter()
            .filter(|r| r.status == ExceptionStatus::Pending)
            .count() as u64)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn insert_exception(&self, new: &NewException) -> anyhow::Result<i64> {
        let mut tables = self.tables.write().await;
        tables.next_id += 1;
        let id = tables.next_id;
        tables.exceptions.push(ExceptionRecord {
            id,
            job_id: new.job_id.clone(),
            job_name: new.job_name.clone(),
            job_type: new.job_type.clone(),
            job_config: new.job_config.clone(),
            error_message: new.error_message.clone(),
            error_type: new.error_type.clone(),
            status: ExceptionStatus::Pending,
            suggested_fix: None,
            diagnosis_confidence: None,
            created_at: now_string(),
            diagnosed_at: None,
        });
        Ok(id)
    }

    async fn get_exception(&self, id: i64) -> anyhow::Result<Option<ExceptionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.exceptions.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_job_id(&self, job_id: &str) -> anyhow::Result<Option<ExceptionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .exceptions
            .iter()
            .rev()
            .find(|r| r.job_id == job_id)
            .cloned())
    }

    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<ExceptionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.exceptions.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exception(job_id: &str) -> NewException {
        NewException {
            job_id: job_id.to_string(),
            error_message: "boom".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn claim_is_fifo_and_exclusive() {
        let queue = InMemoryExceptionQueue::new();
        queue.insert_exception(&exception("a")).await.unwrap();
        queue.insert_exception(&exception("b")).await.unwrap();

        let claims = futures::future::join_all((0..3).map(|_| queue.claim_pending())).await;
        let ids: Vec<_> = claims
            .into_iter()
            .map(|c| c.unwrap().map(|j| j.job_id))
            .collect();
        assert_eq!(ids, vec![Some("a".to_string()), Some("b".to_string()), None]);
    }

    #[tokio::test]
    async fn mark_failed_keeps_status_and_payload() {
        let queue = InMemoryExceptionQueue::new();
        let id = queue.insert_exception(&exception("a")).await.unwrap();
        queue.mark_failed(id, "Storage error: disk").await.unwrap();

        let record = queue.find_by_job_id("a").await.unwrap().unwrap();
        assert_eq!(record.status, ExceptionStatus::Failed);
        assert_eq!(record.suggested_fix.unwrap()["error"], "Storage error: disk");
        assert_eq!(queue.count_pending().await.unwrap(), 0);
    }
}
