//! Scripted fakes of the workflow capabilities, shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::knowledge::{CollectionStats, KnowledgeCase, KnowledgeDoc, KnowledgeStore};
use crate::llm::DiagnosisModel;
use crate::queue::{ExceptionQueue, ExceptionRecord, ExceptionStatus, InMemoryExceptionQueue, NewException};
use crate::workflow::{
    DiagnosisResult, ErrorType, JobInfo, Priority, RetrievedCase, RetrievedContext, RetrievedDoc,
};

pub fn diagnosis(confidence: f64) -> DiagnosisResult {
    DiagnosisResult {
        root_cause: "Checkpoint storage too slow".to_string(),
        detailed_analysis: "Barriers time out while uploading state".to_string(),
        suggested_fix: "Raise execution.checkpointing.timeout".to_string(),
        priority: Priority::High,
        confidence,
        related_docs: vec![],
    }
}

/// Model whose diagnose replies are scripted per call; once the script runs
/// out every call fails.
pub struct ScriptedModel {
    pub label: ErrorType,
    pub embed_fails: bool,
    pub classify_fails: bool,
    replies: Mutex<VecDeque<anyhow::Result<DiagnosisResult>>>,
    classify_calls: Mutex<u32>,
    contexts: Mutex<Vec<Option<RetrievedContext>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<anyhow::Result<DiagnosisResult>>) -> Self {
        Self {
            label: ErrorType::CheckpointFailure,
            embed_fails: false,
            classify_fails: false,
            replies: Mutex::new(replies.into()),
            classify_calls: Mutex::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn classify_calls(&self) -> u32 {
        *self.classify_calls.lock().unwrap()
    }

    /// Context passed to each diagnose call, in order.
    pub fn diagnose_contexts(&self) -> Vec<Option<RetrievedContext>> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiagnosisModel for ScriptedModel {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        if self.embed_fails {
            anyhow::bail!("connection refused");
        }
        Ok(vec![1.0, 0.0, 0.0])
    }

    async fn classify_error(&self, _error_message: &str) -> anyhow::Result<ErrorType> {
        *self.classify_calls.lock().unwrap() += 1;
        if self.classify_fails {
            anyhow::bail!("Client error (HTTP 400): unknown model");
        }
        Ok(self.label)
    }

    async fn generate_diagnosis(
        &self,
        _job: &JobInfo,
        context: Option<&RetrievedContext>,
    ) -> anyhow::Result<DiagnosisResult> {
        self.contexts.lock().unwrap().push(context.cloned());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted reply")))
    }
}

/// Knowledge store where every call fails.
pub struct UnreachableKnowledge;

#[async_trait]
impl KnowledgeStore for UnreachableKnowledge {
    async fn search_cases(
        &self,
        _embedding: &[f32],
        _error_type: Option<&str>,
        _limit: usize,
    ) -> anyhow::Result<Vec<RetrievedCase>> {
        anyhow::bail!("network error")
    }

    async fn search_docs(
        &self,
        _embedding: &[f32],
        _category: Option<&str>,
        _limit: usize,
    ) -> anyhow::Result<Vec<RetrievedDoc>> {
        anyhow::bail!("network error")
    }

    async fn insert_case(&self, _case: &KnowledgeCase, _embedding: &[f32]) -> anyhow::Result<()> {
        anyhow::bail!("network error")
    }

    async fn insert_doc(&self, _doc: &KnowledgeDoc, _embedding: &[f32]) -> anyhow::Result<()> {
        anyhow::bail!("network error")
    }

    async fn collection_stats(&self) -> anyhow::Result<CollectionStats> {
        anyhow::bail!("network error")
    }
}

/// In-memory queue with switchable failures.
#[derive(Default)]
pub struct FlakyQueue {
    pub inner: InMemoryExceptionQueue,
    pub fail_claim: bool,
    /// Only `complete` fails; case rows still go through.
    pub fail_complete: bool,
    pub fail_writes: bool,
    pub fail_ping: bool,
}

#[async_trait]
impl ExceptionQueue for FlakyQueue {
    async fn claim_pending(&self) -> anyhow::Result<Option<JobInfo>> {
        if self.fail_claim {
            anyhow::bail!("database is locked");
        }
        self.inner.claim_pending().await
    }

    async fn complete(
        &self,
        exception_id: i64,
        diagnosis: &DiagnosisResult,
        status: ExceptionStatus,
    ) -> anyhow::Result<()> {
        if self.fail_writes || self.fail_complete {
            anyhow::bail!("disk I/O error");
        }
        self.inner.complete(exception_id, diagnosis, status).await
    }

    async fn mark_failed(&self, exception_id: i64, message: &str) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("disk I/O error");
        }
        self.inner.mark_failed(exception_id, message).await
    }

    async fn insert_case(&self, case: &KnowledgeCase) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("disk I/O error");
        }
        self.inner.insert_case(case).await
    }

    async fn count_pending(&self) -> anyhow::Result<u64> {
        if self.fail_ping {
            anyhow::bail!("unable to open database file");
        }
        self.inner.count_pending().await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        if self.fail_ping {
            anyhow::bail!("unable to open database file");
        }
        Ok(())
    }

    async fn insert_exception(&self, new: &NewException) -> anyhow::Result<i64> {
        self.inner.insert_exception(new).await
    }

    async fn get_exception(&self, id: i64) -> anyhow::Result<Option<ExceptionRecord>> {
        self.inner.get_exception(id).await
    }

    async fn find_by_job_id(&self, job_id: &str) -> anyhow::Result<Option<ExceptionRecord>> {
        self.inner.find_by_job_id(job_id).await
    }

    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<ExceptionRecord>> {
        self.inner.list_recent(limit).await
    }
}
