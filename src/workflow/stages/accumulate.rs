use chrono::Utc;

use crate::knowledge::{generalize_error_pattern, new_case_id, KnowledgeCase, SourceType};
use crate::util::truncate_chars;
use crate::workflow::engine::DiagnosisWorkflow;
use crate::workflow::state::{DiagnosisResult, ErrorType, JobInfo, RunState};

const MAX_CASE_TEXT_MESSAGE_CHARS: usize = 1000;

/// Text embedded for a new case.
fn case_text(error_type: &str, error_message: &str, diagnosis: &DiagnosisResult) -> String {
    format!(
        "Error Type: {}\nError Message: {}\nRoot Cause: {}\nSolution: {}",
        error_type,
        truncate_chars(error_message, MAX_CASE_TEXT_MESSAGE_CHARS),
        diagnosis.root_cause,
        diagnosis.suggested_fix
    )
}

impl DiagnosisWorkflow {
    /// Fold a confident diagnosis back into the knowledge store. Best effort:
    /// the state is returned unchanged whatever happens.
    pub(in crate::workflow) async fn accumulate(&self, state: RunState) -> RunState {
        let (Some(job), Some(diagnosis)) = (state.job.as_ref(), state.diagnosis.as_ref()) else {
            return state;
        };

        let threshold = self.knowledge_config.confidence_threshold;
        if diagnosis.confidence < threshold {
            tracing::debug!(
                job_id = %job.job_id,
                confidence = diagnosis.confidence,
                threshold,
                "Confidence below threshold, not accumulating"
            );
            return state;
        }

        match self.write_case(job, diagnosis).await {
            Ok(case_id) => tracing::info!(
                job_id = %job.job_id,
                case_id = %case_id,
                confidence = diagnosis.confidence,
                "Accumulated knowledge case"
            ),
            Err(e) => tracing::warn!(job_id = %job.job_id, "Knowledge accumulation failed: {:#}", e),
        }

        state
    }

    async fn write_case(&self, job: &JobInfo, diagnosis: &DiagnosisResult) -> anyhow::Result<String> {
        let error_type = job
            .error_type
            .clone()
            .unwrap_or_else(|| ErrorType::Other.as_str().to_string());

        let case = KnowledgeCase {
            case_id: new_case_id(),
            error_pattern: generalize_error_pattern(&job.error_message),
            root_cause: diagnosis.root_cause.clone(),
            solution: diagnosis.suggested_fix.clone(),
            source_exception_id: Some(job.exception_id),
            source_type: SourceType::Auto,
            verified: false,
            created_at: Utc::now(),
            error_type,
        };

        let embedding = self
            .model
            .embed(&case_text(&case.error_type, &job.error_message, diagnosis))
            .await?;

        // Vector entry first; the relational row is only written once it exists.
        self.knowledge.insert_case(&case, &embedding).await?;
        self.queue.insert_case(&case).await?;

        Ok(case.case_id)
    }
}
