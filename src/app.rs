//! Process bootstrap shared by the server and worker binaries.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::knowledge::{self, KnowledgeStore};
use crate::llm::{DiagnosisModel, LlmService};
use crate::queue::{ExceptionQueue, SqliteExceptionQueue};
use crate::runner::BatchRunner;
use crate::workflow::DiagnosisWorkflow;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oceanus_agent=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// The capabilities a diagnosis process runs against.
pub struct Services {
    pub queue: Arc<dyn ExceptionQueue>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub model: Arc<dyn DiagnosisModel>,
}

impl Services {
    /// Open the exception database and build the model and knowledge clients.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let queue =
            SqliteExceptionQueue::open(config.database.path.clone(), config.database.busy_timeout)
                .await?;
        tracing::info!(path = %config.database.path.display(), "Opened exception database");

        Ok(Self {
            queue: Arc::new(queue),
            knowledge: knowledge::from_config(&config.vector),
            model: Arc::new(LlmService::from_config(&config.llm)?),
        })
    }

    pub fn workflow(&self, config: &Config) -> DiagnosisWorkflow {
        DiagnosisWorkflow::new(
            self.queue.clone(),
            self.knowledge.clone(),
            self.model.clone(),
            config.knowledge.clone(),
            &config.workflow,
        )
    }

    pub fn batch_runner(&self, config: &Config) -> BatchRunner {
        BatchRunner::new(
            Arc::new(self.workflow(config)),
            self.queue.clone(),
            config.scheduler.clone(),
        )
    }
}
