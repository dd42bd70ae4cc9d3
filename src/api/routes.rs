//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::knowledge::KnowledgeStore;
use crate::queue::ExceptionQueue;

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub queue: Arc<dyn ExceptionQueue>,
    pub knowledge: Arc<dyn KnowledgeStore>,
}

type ApiError = (StatusCode, Json<ErrorDetail>);

fn unavailable(detail: String) -> ApiError {
    (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorDetail { detail }))
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/ready", get(ready))
        .route("/api/v1/stats", get(stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server; returns once `shutdown` is cancelled and in-flight
/// requests have drained.
pub async fn serve(state: Arc<AppState>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.server.environment.clone(),
    })
}

/// Readiness check: the exception database must answer.
async fn ready(State(state): State<Arc<AppState>>) -> Result<Json<ReadyResponse>, ApiError> {
    match state.queue.ping().await {
        Ok(()) => Ok(Json(ReadyResponse {
            status: "ready".to_string(),
        })),
        Err(e) => {
            tracing::warn!("Readiness check failed: {:#}", e);
            Err(unavailable(format!("Database not ready: {}", e)))
        }
    }
}

/// Queue depth and knowledge collection sizes.
async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let pending_exceptions = state
        .queue
        .count_pending()
        .await
        .map_err(|e| unavailable(format!("Database not ready: {}", e)))?;

    let collections = match state.knowledge.collection_stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!("Failed to read knowledge collection stats: {:#}", e);
            None
        }
    };

    Ok(Json(StatsResponse {
        pending_exceptions,
        knowledge_cases: collections.map(|c| c.cases),
        knowledge_docs: collections.map(|c| c.docs),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::InMemoryKnowledgeStore;
    use crate::queue::NewException;
    use crate::testing::{FlakyQueue, UnreachableKnowledge};

    fn state(queue: FlakyQueue, knowledge: Arc<dyn KnowledgeStore>) -> Arc<AppState> {
        Arc::new(AppState {
            config: Config::default(),
            queue: Arc::new(queue),
            knowledge,
        })
    }

    #[tokio::test]
    async fn health_reports_environment() {
        let state = state(FlakyQueue::default(), Arc::new(InMemoryKnowledgeStore::new()));
        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "healthy");
        assert_eq!(body.environment, "development");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn ready_when_database_answers() {
        let state = state(FlakyQueue::default(), Arc::new(InMemoryKnowledgeStore::new()));
        let Json(body) = ready(State(state)).await.unwrap();
        assert_eq!(body.status, "ready");
    }

    #[tokio::test]
    async fn not_ready_when_database_down() {
        let queue = FlakyQueue {
            fail_ping: true,
            ..Default::default()
        };
        let state = state(queue, Arc::new(InMemoryKnowledgeStore::new()));
        let (status, Json(body)) = ready(State(state)).await.unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.detail.starts_with("Database not ready:"));
    }

    #[tokio::test]
    async fn stats_tolerate_unreachable_vector_store() {
        let queue = FlakyQueue::default();
        queue
            .insert_exception(&NewException {
                job_id: "job-1".to_string(),
                error_message: "boom".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let state = state(queue, Arc::new(UnreachableKnowledge));

        let Json(body) = stats(State(state)).await.unwrap();
        assert_eq!(body.pending_exceptions, 1);
        assert_eq!(body.knowledge_cases, None);
    }
}
