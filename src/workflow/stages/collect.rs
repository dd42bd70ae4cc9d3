use crate::workflow::engine::DiagnosisWorkflow;
use crate::workflow::state::{DiagnosisStatus, RunState};

impl DiagnosisWorkflow {
    /// Claim one pending exception record.
    pub(in crate::workflow) async fn collect(&self, mut state: RunState) -> RunState {
        match self.queue.claim_pending().await {
            Ok(Some(job)) => {
                tracing::info!(
                    exception_id = job.exception_id,
                    job_id = %job.job_id,
                    "Collected exception"
                );
                state.job = Some(job);
                state.status = DiagnosisStatus::InProgress;
                state
            }
            Ok(None) => {
                tracing::info!("No pending exceptions");
                state.finish(DiagnosisStatus::Completed)
            }
            Err(e) => {
                tracing::error!("Failed to collect exception: {:#}", e);
                state.error = Some(format!("Collection error: {}", e));
                state.finish(DiagnosisStatus::Failed)
            }
        }
    }
}
