use crate::queue::ExceptionStatus;
use crate::workflow::engine::DiagnosisWorkflow;
use crate::workflow::state::{DiagnosisStatus, RunState};

impl DiagnosisWorkflow {
    /// Persist the outcome against the claimed record. Storage errors are terminal.
    pub(in crate::workflow) async fn store(&self, mut state: RunState) -> RunState {
        let Some(exception_id) = state.job.as_ref().map(|j| j.exception_id) else {
            state.error = Some("Storage error: no job to store".to_string());
            return state.finish(DiagnosisStatus::Failed);
        };

        let (persisted, status) = match state.diagnosis.as_ref() {
            Some(diagnosis) => (
                self.queue
                    .complete(exception_id, diagnosis, ExceptionStatus::Completed)
                    .await,
                DiagnosisStatus::Completed,
            ),
            None => {
                let message = state
                    .error
                    .clone()
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "Unknown error".to_string());
                (
                    self.queue.mark_failed(exception_id, &message).await,
                    DiagnosisStatus::Failed,
                )
            }
        };

        match persisted {
            Ok(()) => {
                tracing::info!(exception_id, status = %status, "Stored diagnosis outcome");
                state.finish(status)
            }
            Err(e) => {
                tracing::error!(exception_id, "Failed to store diagnosis: {:#}", e);
                state.error = Some(format!("Storage error: {}", e));
                state.finish(DiagnosisStatus::Failed)
            }
        }
    }
}
