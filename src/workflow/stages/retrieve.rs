use crate::util::truncate_chars;
use crate::workflow::engine::DiagnosisWorkflow;
use crate::workflow::state::{RetrievedContext, RunState};

const MAX_QUERY_MESSAGE_CHARS: usize = 1000;

impl DiagnosisWorkflow {
    /// Look up similar cases and docs. Failures yield an empty context, never an error.
    pub(in crate::workflow) async fn retrieve(&self, mut state: RunState) -> RunState {
        let Some(job) = state.job.as_ref() else {
            state.retrieved_context = Some(RetrievedContext::default());
            return state;
        };

        let query = format!(
            "{} {}",
            job.error_type.as_deref().unwrap_or(""),
            truncate_chars(&job.error_message, MAX_QUERY_MESSAGE_CHARS)
        );

        let context = match self.search(&query, job.error_type.as_deref()).await {
            Ok(context) => {
                tracing::info!(
                    job_id = %job.job_id,
                    cases = context.similar_cases.len(),
                    docs = context.doc_snippets.len(),
                    "Retrieved context"
                );
                context
            }
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, "Context retrieval failed, continuing without context: {:#}", e);
                RetrievedContext::default()
            }
        };

        state.retrieved_context = Some(context);
        state
    }

    async fn search(&self, query: &str, error_type: Option<&str>) -> anyhow::Result<RetrievedContext> {
        let embedding = self.model.embed(query).await?;
        let similar_cases = self
            .knowledge
            .search_cases(&embedding, error_type, self.knowledge_config.max_similar_cases)
            .await?;
        let doc_snippets = self
            .knowledge
            .search_docs(&embedding, None, self.knowledge_config.max_doc_snippets)
            .await?;
        Ok(RetrievedContext {
            similar_cases,
            doc_snippets,
        })
    }
}
