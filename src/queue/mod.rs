//! Exception queue: failed Flink job records awaiting diagnosis.
//!
//! Records are created externally with status `pending`, claimed (`in_progress`)
//! by exactly one workflow run and finished (`completed` / `failed`) by the
//! store stage.

mod memory;
mod sqlite;

pub use memory::InMemoryExceptionQueue;
pub use sqlite::SqliteExceptionQueue;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::knowledge::KnowledgeCase;
use crate::workflow::{DiagnosisResult, JobInfo};

/// Lifecycle status of a persisted exception record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ExceptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExceptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A new failure report entering the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewException {
    pub job_id: String,
    pub job_name: Option<String>,
    pub job_type: Option<String>,
    pub job_config: Option<serde_json::Value>,
    pub error_message: String,
    pub error_type: Option<String>,
}

/// A persisted exception record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub id: i64,
    pub job_id: String,
    pub job_name: Option<String>,
    pub job_type: Option<String>,
    pub job_config: Option<serde_json::Value>,
    pub error_message: String,
    pub error_type: Option<String>,
    pub status: ExceptionStatus,
    /// Diagnosis JSON on success, `{"error": ...}` on failure
    pub suggested_fix: Option<serde_json::Value>,
    pub diagnosis_confidence: Option<f64>,
    pub created_at: String,
    pub diagnosed_at: Option<String>,
}

impl ExceptionRecord {
    pub fn to_job_info(&self) -> JobInfo {
        JobInfo {
            exception_id: self.id,
            job_id: self.job_id.clone(),
            job_name: self.job_name.clone(),
            job_type: self.job_type.clone(),
            job_config: self.job_config.clone(),
            error_message: self.error_message.clone(),
            error_type: self.error_type.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

/// The persisted form of a successful diagnosis; confidence lives in its own column.
pub(crate) fn diagnosis_payload(diagnosis: &DiagnosisResult) -> serde_json::Value {
    serde_json::json!({
        "root_cause": diagnosis.root_cause,
        "detailed_analysis": diagnosis.detailed_analysis,
        "suggested_fix": diagnosis.suggested_fix,
        "priority": diagnosis.priority,
        "related_docs": diagnosis.related_docs,
    })
}

pub(crate) fn failure_payload(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

pub(crate) fn now_string() -> String {
    Utc::now().to_rfc3339()
}

/// Relational store backing the diagnosis workflow.
#[async_trait]
pub trait ExceptionQueue: Send + Sync {
    /// Atomically take the oldest pending record and mark it in progress.
    ///
    /// Concurrent callers never receive the same record.
    async fn claim_pending(&self) -> anyhow::Result<Option<JobInfo>>;

    /// Persist a diagnosis against a claimed record.
    async fn complete(
        &self,
        exception_id: i64,
        diagnosis: &DiagnosisResult,
        status: ExceptionStatus,
    ) -> anyhow::Result<()>;

    async fn mark_failed(&self, exception_id: i64, message: &str) -> anyhow::Result<()>;

    /// Record knowledge-case metadata. Fails if `case_id` already exists.
    async fn insert_case(&self, case: &KnowledgeCase) -> anyhow::Result<()>;

    async fn count_pending(&self) -> anyhow::Result<u64>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> anyhow::Result<()>;

    /// Enqueue a new pending record, returning its id.
    async fn insert_exception(&self, new: &NewException) -> anyhow::Result<i64>;

    async fn get_exception(&self, id: i64) -> anyhow::Result<Option<ExceptionRecord>>;

    /// Most recent record for a job.
    async fn find_by_job_id(&self, job_id: &str) -> anyhow::Result<Option<ExceptionRecord>>;

    /// Newest first.
    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<ExceptionRecord>>;
}
