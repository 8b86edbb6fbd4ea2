//! Narrated video pipeline worker.
//!
//! This crate provides:
//! - Bounded-concurrency generation with multi-pass retry and placeholders
//! - The script-to-video orchestrator with normalized progress reporting
//! - Sequential script batches with pause, resume and cancel
//! - Collaborator traits and their local and hosted implementations
//! - Capped in-memory job and batch stores

pub mod batch;
pub mod config;
pub mod error;
pub mod generation;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod services;
pub mod stages;
pub mod status;
pub mod store;

pub use batch::{BatchControl, BatchRunner, ScriptJobRunner};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use generation::{GenerationStageExecutor, ItemOutcome, ProgressAggregator, RetryPolicy, StageGenerator};
pub use logging::JobLogger;
pub use orchestrator::{PipelineOrchestrator, PipelineServices};
pub use status::{BatchSink, LogSink, StatusHandle, StatusReporter, StatusSink};
pub use store::{BatchStore, JobStore, MemoryBatchStore, MemoryJobStore};
