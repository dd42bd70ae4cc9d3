//! Oceanus Agent - HTTP Server Entry Point
//!
//! Serves the health endpoints and runs diagnosis batches in the background.

use std::sync::Arc;

use oceanus_agent::{
    api::{self, AppState},
    app::{self, Services},
    config::Config,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::init_logging();

    let config = Config::from_env()?;
    info!(
        environment = %config.server.environment,
        model = %config.llm.model,
        interval = ?config.scheduler.interval,
        batch_size = config.scheduler.batch_size,
        "Loaded configuration"
    );

    let services = Services::from_config(&config).await?;
    let runner = services.batch_runner(&config);
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            api::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    // Fire-and-forget: the server does not wait on batches.
    let batches = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { runner.run_until_stopped(shutdown).await }
    });

    let state = Arc::new(AppState {
        config,
        queue: services.queue.clone(),
        knowledge: services.knowledge.clone(),
    });
    let served = api::serve(state, shutdown.clone()).await;

    // Make sure the runner stops even if the server exited on its own.
    shutdown.cancel();
    if let Err(e) = batches.await {
        tracing::error!("Batch runner task failed: {}", e);
    }

    served
}
