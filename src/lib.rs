//! # Oceanus Agent
//!
//! Automated diagnosis of failed Flink stream-processing jobs.
//!
//! A batch runner repeatedly claims one pending exception record, retrieves
//! similar historical cases and documentation from a vector store, asks a
//! language model for a structured root cause and fix, persists the result,
//! and folds confident diagnoses back into the knowledge store.
//!
//! ## Workflow
//!
//! ```text
//!   collect ──▶ retrieve ──▶ diagnose ──▶ store ──▶ accumulate
//!      │                      │  ▲
//!      │                      └──┘ retry (bounded)
//!      ▼                      ▼
//!    (end)              handle_error
//! ```
//!
//! ## Modules
//! - `workflow`: run state, stage graph and the five stages
//! - `llm`: OpenAI-compatible chat/embedding client and the diagnosis model
//! - `knowledge`: vector search over cases and docs (pgvector or in-memory)
//! - `queue`: exception records and case metadata (SQLite or in-memory)
//! - `runner`: periodic batches with cooperative stop
//! - `api`: health, readiness and stats endpoints

pub mod api;
pub mod app;
pub mod config;
pub mod knowledge;
pub mod llm;
pub mod queue;
pub mod runner;
pub mod util;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use runner::{BatchReport, BatchRunner};
pub use workflow::{DiagnosisWorkflow, RunOutcome, RunState};
