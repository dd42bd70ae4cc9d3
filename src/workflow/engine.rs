//! Stage graph and run loop.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::state::{DiagnosisStatus, RunState};
use crate::config::{KnowledgeConfig, WorkflowConfig};
use crate::knowledge::KnowledgeStore;
use crate::llm::DiagnosisModel;
use crate::queue::ExceptionQueue;

/// A node in the diagnosis graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collect,
    Retrieve,
    Diagnose,
    Store,
    Accumulate,
    HandleError,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Retrieve => "retrieve",
            Self::Diagnose => "diagnose",
            Self::Store => "store",
            Self::Accumulate => "accumulate",
            Self::HandleError => "handle_error",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of a run plus the stages it visited, in order.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    pub trace: Vec<Stage>,
}

impl RunOutcome {
    pub fn visited(&self, stage: Stage) -> usize {
        self.trace.iter().filter(|s| **s == stage).count()
    }
}

/// After collect: an error wins over a job, no job ends the run.
pub fn route_after_collect(state: &RunState) -> Option<Stage> {
    if state.has_error() {
        Some(Stage::HandleError)
    } else if state.job.is_none() {
        None
    } else {
        Some(Stage::Retrieve)
    }
}

/// After diagnose: retry while under the cap, escalate once it is reached.
pub fn route_after_diagnose(state: &RunState, max_retries: u32) -> Option<Stage> {
    if !state.has_error() {
        Some(Stage::Store)
    } else if state.retry_count < max_retries {
        Some(Stage::Diagnose)
    } else {
        Some(Stage::HandleError)
    }
}

/// Runs the diagnosis graph against the configured capabilities.
pub struct DiagnosisWorkflow {
    pub(super) queue: Arc<dyn ExceptionQueue>,
    pub(super) knowledge: Arc<dyn KnowledgeStore>,
    pub(super) model: Arc<dyn DiagnosisModel>,
    pub(super) knowledge_config: KnowledgeConfig,
    pub(super) max_diagnose_retries: u32,
}

impl DiagnosisWorkflow {
    pub fn new(
        queue: Arc<dyn ExceptionQueue>,
        knowledge: Arc<dyn KnowledgeStore>,
        model: Arc<dyn DiagnosisModel>,
        knowledge_config: KnowledgeConfig,
        workflow_config: &WorkflowConfig,
    ) -> Self {
        Self {
            queue,
            knowledge,
            model,
            knowledge_config,
            max_diagnose_retries: workflow_config.max_diagnose_retries.max(1),
        }
    }

    /// Upper bound on stage executions in a single run.
    fn step_limit(&self) -> usize {
        // collect, retrieve, every diagnose attempt, then store + accumulate
        // or handle_error
        self.max_diagnose_retries as usize + 4
    }

    /// Execute one run. Never fails: every stage failure becomes a state transition.
    pub async fn run(&self, run_id: &str) -> RunOutcome {
        tracing::info!(run_id, "Workflow run started");

        let mut state = RunState::new();
        let mut trace = Vec::new();
        let mut next = Some(Stage::Collect);

        while let Some(stage) = next {
            if trace.len() >= self.step_limit() {
                tracing::error!(run_id, stage = %stage, steps = trace.len(), "Workflow step limit exceeded");
                state.error = Some(format!("Workflow step limit exceeded at {}", stage));
                trace.push(Stage::HandleError);
                state = handle_error(state);
                break;
            }

            trace.push(stage);
            tracing::debug!(run_id, stage = %stage, job_id = state.job_id(), "Entering stage");

            next = match stage {
                Stage::Collect => {
                    state = self.collect(state).await;
                    route_after_collect(&state)
                }
                Stage::Retrieve => {
                    state = self.retrieve(state).await;
                    Some(Stage::Diagnose)
                }
                Stage::Diagnose => {
                    state = self.diagnose(state).await;
                    route_after_diagnose(&state, self.max_diagnose_retries)
                }
                Stage::Store => {
                    state = self.store(state).await;
                    Some(Stage::Accumulate)
                }
                Stage::Accumulate => {
                    state = self.accumulate(state).await;
                    None
                }
                Stage::HandleError => {
                    state = handle_error(state);
                    None
                }
            };
        }

        tracing::info!(
            run_id,
            job_id = state.job_id(),
            status = %state.status,
            steps = trace.len(),
            "Workflow run finished"
        );

        RunOutcome { state, trace }
    }
}

/// Terminal error path: force FAILED and make sure `end_time` is stamped.
pub(super) fn handle_error(mut state: RunState) -> RunState {
    tracing::error!(
        job_id = state.job_id(),
        error = state.error.as_deref().unwrap_or(""),
        "Workflow ended with error"
    );
    state.status = DiagnosisStatus::Failed;
    if state.end_time.is_none() {
        state.end_time = Some(Utc::now());
    }
    state
}
