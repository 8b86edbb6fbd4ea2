//! Structured job logging.
//!
//! Every event carries the job id and the operation so a single job can be
//! followed through interleaved batch output.

use reel_models::{JobId, JobStatus};
use tracing::{error, info, warn, Span};
use tracing_subscriber::filter::{EnvFilter, ParseError};

/// Default levels for the workspace crates; `RUST_LOG` adds to these.
pub const DEFAULT_LOG_DIRECTIVES: [&str; 4] = [
    "reel_worker=info",
    "reel_media=info",
    "reel_genai=info",
    "reel_models=info",
];

/// `RUST_LOG` filter with [`DEFAULT_LOG_DIRECTIVES`] applied.
pub fn env_filter() -> Result<EnvFilter, ParseError> {
    let mut filter = EnvFilter::from_default_env();
    for directive in DEFAULT_LOG_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Logger bound to one job and operation.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a logger for `job_id`; `operation` names the unit of work
    /// (e.g. "script_to_video", "batch").
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self::from_string(job_id.as_str(), operation)
    }

    pub fn from_string(job_id: &str, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// Log entry into a pipeline stage.
    pub fn log_stage(&self, status: JobStatus, progress: f64) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %status,
            progress = format!("{:.0}%", progress * 100.0),
            "Job stage: {}", status
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span to instrument the whole job future with.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "script_to_video");

        assert_eq!(logger.job_id(), job_id.as_str());
        assert_eq!(logger.operation(), "script_to_video");
    }

    #[test]
    fn test_logging_without_subscriber() {
        let logger = JobLogger::from_string("batch_1_0", "batch");
        logger.log_start("3 scripts");
        logger.log_stage(JobStatus::GeneratingAudio, 0.1);
        logger.log_warning("slow");
        logger.log_completion("done");
        let _span = logger.create_span();
    }

    #[test]
    fn test_default_directives_name_real_targets() {
        let this_crate = module_path!().split("::").next().unwrap();
        assert!(DEFAULT_LOG_DIRECTIVES
            .iter()
            .any(|d| d.starts_with(&format!("{}=", this_crate))));
        for directive in DEFAULT_LOG_DIRECTIVES {
            let target = directive.split('=').next().unwrap();
            assert!(target.starts_with("reel_"), "{} is not a crate target", directive);
        }
        assert!(env_filter().is_ok());
    }
}
