use crate::workflow::engine::DiagnosisWorkflow;
use crate::workflow::state::{DiagnosisResult, DiagnosisStatus, JobInfo, RetrievedContext, RunState};

impl DiagnosisWorkflow {
    /// Classify when needed, then ask the model for a diagnosis.
    ///
    /// A failure bumps `retry_count`; reaching the cap fails the run.
    pub(in crate::workflow) async fn diagnose(&self, mut state: RunState) -> RunState {
        let result = match state.job.as_mut() {
            Some(job) => self.diagnose_job(job, state.retrieved_context.as_ref()).await,
            None => Err(anyhow::anyhow!("No job information available")),
        };

        match result {
            Ok(diagnosis) => {
                tracing::info!(
                    job_id = state.job_id(),
                    confidence = diagnosis.confidence,
                    "Diagnosis completed"
                );
                state.diagnosis = Some(diagnosis);
                state.error = None;
                state.retry_count = 0;
                state.status = DiagnosisStatus::InProgress;
                state
            }
            Err(e) => {
                state.retry_count += 1;
                tracing::warn!(
                    job_id = state.job_id(),
                    retry_count = state.retry_count,
                    max_retries = self.max_diagnose_retries,
                    "Diagnosis attempt failed: {:#}",
                    e
                );

                if state.retry_count >= self.max_diagnose_retries {
                    state.error = Some(format!(
                        "Diagnosis failed after {} retries: {}",
                        state.retry_count, e
                    ));
                    state.finish(DiagnosisStatus::Failed)
                } else {
                    state.error = Some(e.to_string());
                    state
                }
            }
        }
    }

    async fn diagnose_job(
        &self,
        job: &mut JobInfo,
        context: Option<&RetrievedContext>,
    ) -> anyhow::Result<DiagnosisResult> {
        // The label sticks to the job, so a retry does not classify again.
        if job.error_type.is_none() {
            let error_type = self.model.classify_error(&job.error_message).await?;
            job.error_type = Some(error_type.as_str().to_string());
        }
        self.model.generate_diagnosis(job, context).await
    }
}
