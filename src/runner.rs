//! Batch runner: drains the exception queue through the workflow on a fixed interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::queue::ExceptionQueue;
use crate::workflow::{DiagnosisStatus, DiagnosisWorkflow, RunOutcome, Stage};

/// How often the stop token is checked while idle between batches.
const STOP_CHECK_TICK: Duration = Duration::from_secs(1);

/// Result of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub processed: usize,
    pub failed: usize,
    /// The queue ran empty before `batch_size` runs
    pub drained: bool,
}

pub struct BatchRunner {
    workflow: Arc<DiagnosisWorkflow>,
    queue: Arc<dyn ExceptionQueue>,
    config: SchedulerConfig,
    tick: Duration,
    batch_count: AtomicU64,
}

impl BatchRunner {
    pub fn new(
        workflow: Arc<DiagnosisWorkflow>,
        queue: Arc<dyn ExceptionQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            workflow,
            queue,
            config,
            tick: STOP_CHECK_TICK,
            batch_count: AtomicU64::new(0),
        }
    }

    /// Override the stop-check tick (tests use milliseconds).
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Number of batches started so far.
    pub fn batches_started(&self) -> u64 {
        self.batch_count.load(Ordering::SeqCst)
    }

    /// Run up to `batch_size` workflow runs, stopping early once the queue is empty.
    pub async fn run_batch(&self) -> BatchReport {
        self.run_batch_until(&CancellationToken::new()).await
    }

    async fn run_batch_until(&self, cancel: &CancellationToken) -> BatchReport {
        let n = self.batch_count.fetch_add(1, Ordering::SeqCst) + 1;
        let batch_id = format!("batch_{}_{}", n, Local::now().format("%Y%m%d_%H%M%S"));

        tracing::info!(
            batch_id = %batch_id,
            batch_size = self.config.batch_size,
            "Starting diagnosis batch"
        );

        let mut report = BatchReport {
            batch_id,
            processed: 0,
            failed: 0,
            drained: false,
        };

        for i in 0..self.config.batch_size {
            if cancel.is_cancelled() {
                tracing::info!(batch_id = %report.batch_id, "Stop requested, ending batch early");
                break;
            }

            let run_id = format!("{}_{}", report.batch_id, i);
            let outcome = self.workflow.run(&run_id).await;

            let Some(job) = outcome.state.job.as_ref() else {
                if outcome.state.status == DiagnosisStatus::Failed {
                    // claim itself failed
                    report.failed += 1;
                    tracing::warn!(
                        run_id = %run_id,
                        error = outcome.state.error.as_deref().unwrap_or(""),
                        "Could not collect exception"
                    );
                } else {
                    tracing::info!(run_id = %run_id, "No more pending exceptions");
                    report.drained = true;
                }
                break;
            };

            if outcome.state.status == DiagnosisStatus::Completed {
                report.processed += 1;
                tracing::info!(
                    job_id = %job.job_id,
                    confidence = ?outcome.state.diagnosis.as_ref().map(|d| d.confidence),
                    "Diagnosis completed"
                );
            } else {
                report.failed += 1;
                tracing::warn!(
                    job_id = %job.job_id,
                    error = outcome.state.error.as_deref().unwrap_or(""),
                    "Diagnosis failed"
                );
                self.release_abandoned(&outcome).await;
            }
        }

        tracing::info!(
            batch_id = %report.batch_id,
            processed = report.processed,
            failed = report.failed,
            "Diagnosis batch completed"
        );
        report
    }

    /// A run that failed before reaching store leaves its record in progress;
    /// close it out so it does not stay claimed forever.
    async fn release_abandoned(&self, outcome: &RunOutcome) {
        if outcome.visited(Stage::Store) > 0 {
            return;
        }
        let Some(job) = outcome.state.job.as_ref() else {
            return;
        };
        let message = outcome
            .state
            .error
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or("Unknown error");

        if let Err(e) = self.queue.mark_failed(job.exception_id, message).await {
            tracing::warn!(
                exception_id = job.exception_id,
                "Failed to mark abandoned exception as failed: {:#}",
                e
            );
        }
    }

    /// One batch now, then one per interval, until `cancel` fires.
    ///
    /// The token is checked once per tick and between runs; a run in flight
    /// always completes.
    pub async fn run_until_stopped(&self, cancel: CancellationToken) {
        tracing::info!(
            interval = ?self.config.interval,
            batch_size = self.config.batch_size,
            "Batch runner started"
        );

        self.run_batch_until(&cancel).await;
        let mut next_batch = Instant::now() + self.config.interval;

        while !cancel.is_cancelled() {
            tokio::time::sleep(self.tick).await;
            if cancel.is_cancelled() {
                break;
            }

            let now = Instant::now();
            if now >= next_batch {
                self.run_batch_until(&cancel).await;
                // Skip slots missed while the batch was running.
                while next_batch <= Instant::now() {
                    next_batch += self.config.interval;
                }
            }
        }

        tracing::info!(batches = self.batches_started(), "Batch runner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KnowledgeConfig, WorkflowConfig};
    use crate::knowledge::InMemoryKnowledgeStore;
    use crate::llm::DiagnosisModel;
    use crate::queue::{ExceptionStatus, InMemoryExceptionQueue, NewException};
    use crate::workflow::{DiagnosisResult, ErrorType, JobInfo, Priority, RetrievedContext};
    use async_trait::async_trait;

    /// Succeeds unless the error message contains "poison".
    struct FixedModel;

    #[async_trait]
    impl DiagnosisModel for FixedModel {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![0.5, 0.5])
        }

        async fn classify_error(&self, _error_message: &str) -> anyhow::Result<ErrorType> {
            Ok(ErrorType::Oom)
        }

        async fn generate_diagnosis(
            &self,
            job: &JobInfo,
            _context: Option<&RetrievedContext>,
        ) -> anyhow::Result<DiagnosisResult> {
            if job.error_message.contains("poison") {
                anyhow::bail!("Parse error: model returned prose");
            }
            Ok(DiagnosisResult {
                root_cause: "heap too small".to_string(),
                detailed_analysis: String::new(),
                suggested_fix: "raise taskmanager.memory.task.heap.size".to_string(),
                priority: Priority::High,
                confidence: 0.6,
                related_docs: vec![],
            })
        }
    }

    async fn runner_with(messages: &[&str], batch_size: usize) -> (BatchRunner, InMemoryExceptionQueue) {
        let queue = InMemoryExceptionQueue::new();
        for (i, message) in messages.iter().enumerate() {
            queue
                .insert_exception(&NewException {
                    job_id: format!("job-{}", i),
                    error_message: message.to_string(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let shared: Arc<dyn ExceptionQueue> = Arc::new(queue.clone());
        let workflow = DiagnosisWorkflow::new(
            shared.clone(),
            Arc::new(InMemoryKnowledgeStore::new()),
            Arc::new(FixedModel),
            KnowledgeConfig::default(),
            &WorkflowConfig::default(),
        );
        let config = SchedulerConfig {
            interval: Duration::from_millis(20),
            batch_size,
        };
        let runner = BatchRunner::new(Arc::new(workflow), shared, config)
            .with_tick(Duration::from_millis(5));
        (runner, queue)
    }

    #[tokio::test]
    async fn batch_stops_when_queue_drains() {
        let (runner, queue) = runner_with(&["OutOfMemoryError", "Java heap space"], 10).await;

        let report = runner.run_batch().await;

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 0);
        assert!(report.drained);
        assert!(report.batch_id.starts_with("batch_1_"));
        assert_eq!(queue.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_respects_batch_size() {
        let (runner, queue) = runner_with(&["a", "b", "c"], 2).await;

        let report = runner.run_batch().await;

        assert_eq!(report.processed, 2);
        assert!(!report.drained);
        assert_eq!(queue.count_pending().await.unwrap(), 1);
        assert!(runner.run_batch().await.batch_id.starts_with("batch_2_"));
    }

    #[tokio::test]
    async fn failed_runs_are_counted_and_released() {
        let (runner, queue) = runner_with(&["poison pill", "heap"], 10).await;

        let report = runner.run_batch().await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        let record = queue.find_by_job_id("job-0").await.unwrap().unwrap();
        assert_eq!(record.status, ExceptionStatus::Failed);
        assert!(record.suggested_fix.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("after 3 retries"));
    }

    #[tokio::test]
    async fn stops_cooperatively() {
        let (runner, _queue) = runner_with(&[], 10).await;
        let runner = Arc::new(runner);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let runner = runner.clone();
            let cancel = cancel.clone();
            async move { runner.run_until_stopped(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(runner.batches_started() >= 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_single_batch() {
        let (runner, _queue) = runner_with(&["a"], 10).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        runner.run_until_stopped(cancel).await;

        // the initial batch still starts, but takes no runs
        assert_eq!(runner.batches_started(), 1);
    }
}
