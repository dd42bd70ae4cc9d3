//! Run state threaded through the diagnosis graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a diagnosis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl DiagnosisStatus {
    /// Whether this status ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for DiagnosisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The closed set of error labels the classifier may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    CheckpointFailure,
    Backpressure,
    DeserializationError,
    Oom,
    Network,
    Other,
}

impl ErrorType {
    pub const ALL: [ErrorType; 6] = [
        ErrorType::CheckpointFailure,
        ErrorType::Backpressure,
        ErrorType::DeserializationError,
        ErrorType::Oom,
        ErrorType::Network,
        ErrorType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckpointFailure => "checkpoint_failure",
            Self::Backpressure => "backpressure",
            Self::DeserializationError => "deserialization_error",
            Self::Oom => "oom",
            Self::Network => "network",
            Self::Other => "other",
        }
    }

    /// Map a raw model reply onto the closed set; anything unrecognized is `Other`.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .unwrap_or(Self::Other)
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failed job under diagnosis, as claimed from the exception queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub exception_id: i64,
    pub job_id: String,
    pub job_name: Option<String>,
    pub job_type: Option<String>,
    pub job_config: Option<serde_json::Value>,
    pub error_message: String,
    /// Filled in by the diagnose stage when absent
    pub error_type: Option<String>,
    pub created_at: String,
}

/// A historical case returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedCase {
    pub case_id: String,
    pub error_type: String,
    pub error_pattern: String,
    pub root_cause: String,
    pub solution: String,
    pub similarity_score: f64,
}

/// A documentation snippet returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub doc_id: String,
    pub title: String,
    pub content: String,
    pub doc_url: Option<String>,
    pub category: Option<String>,
    pub similarity_score: f64,
}

/// Context retrieved from the knowledge store, ordered by similarity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub similar_cases: Vec<RetrievedCase>,
    pub doc_snippets: Vec<RetrievedDoc>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.similar_cases.is_empty() && self.doc_snippets.is_empty()
    }
}

/// Diagnosis priority, based on impact and urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Structured root-cause and fix recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub root_cause: String,
    pub detailed_analysis: String,
    pub suggested_fix: String,
    pub priority: Priority,
    /// Always within [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub related_docs: Vec<String>,
}

/// State for one workflow run.
///
/// Stages take the state by value and return the next one; nothing outside the
/// run holds a reference to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub job: Option<JobInfo>,
    pub status: DiagnosisStatus,
    pub retrieved_context: Option<RetrievedContext>,
    pub diagnosis: Option<DiagnosisResult>,
    pub start_time: DateTime<Utc>,
    /// Set exactly when `status` becomes terminal
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl RunState {
    /// Fresh state at the start of a run.
    pub fn new() -> Self {
        Self {
            job: None,
            status: DiagnosisStatus::Pending,
            retrieved_context: None,
            diagnosis: None,
            start_time: Utc::now(),
            end_time: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Move to a terminal status, stamping `end_time`.
    pub fn finish(mut self, status: DiagnosisStatus) -> Self {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.end_time = Some(Utc::now());
        self
    }

    /// `job_id` for log lines, `"unknown"` before collect succeeded.
    pub fn job_id(&self) -> &str {
        self.job
            .as_ref()
            .map(|j| j.job_id.as_str())
            .unwrap_or("unknown")
    }

    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
