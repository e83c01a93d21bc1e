//! Batch files and the best-effort orchestrator.

mod job;
mod orchestrator;

pub use job::{BatchConfig, BatchFile, BatchJob};
pub use orchestrator::{BatchOrchestrator, BatchSummary, JobContext, JobReport, ProgressFactory};
