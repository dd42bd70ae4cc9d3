//! HTTP API for the diagnosis agent.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Liveness
//! - `GET /api/v1/ready` - Readiness; 503 when the exception database is unreachable
//! - `GET /api/v1/stats` - Pending exceptions and knowledge collection sizes

mod routes;
pub mod types;

pub use routes::{router, serve, shutdown_signal, AppState};
pub use types::*;
