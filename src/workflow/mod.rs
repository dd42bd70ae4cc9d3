//! Diagnosis workflow: collect → retrieve → diagnose → store → accumulate.
//!
//! One run handles at most one exception record. The run state is owned by the
//! run and handed from stage to stage by value; the engine decides the next
//! stage from the state alone.

mod engine;
mod stages;
mod state;

pub use engine::{route_after_collect, route_after_diagnose, DiagnosisWorkflow, RunOutcome, Stage};
pub use state::{
    DiagnosisResult, DiagnosisStatus, ErrorType, JobInfo, Priority, RetrievedCase,
    RetrievedContext, RetrievedDoc, RunState,
};
