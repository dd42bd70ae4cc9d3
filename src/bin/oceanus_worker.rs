//! Standalone diagnosis worker: runs batches on the configured interval until
//! SIGINT/SIGTERM.

use oceanus_agent::{
    api,
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
        interval = ?config.scheduler.interval,
        batch_size = config.scheduler.batch_size,
        "Starting Oceanus diagnosis worker"
    );

    let services = Services::from_config(&config).await?;
    let runner = services.batch_runner(&config);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            api::shutdown_signal().await;
            cancel.cancel();
        }
    });

    runner.run_until_stopped(cancel).await;
    info!("Worker stopped");
    Ok(())
}
