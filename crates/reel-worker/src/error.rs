//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Stage {stage} failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Generation service error: {0}")]
    Generation(#[from] reel_genai::GenError),

    #[error("Model error: {0}")]
    Model(#[from] reel_models::ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn stage_failed(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Generation(e) => e.is_retryable(),
            WorkerError::Media(e) => e.is_timeout(),
            WorkerError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_genai::GenError;

    #[test]
    fn test_generation_errors_keep_classification() {
        let rate_limited: WorkerError = GenError::from_status(429, "").into();
        assert!(rate_limited.is_retryable());

        let rejected: WorkerError = GenError::from_status(422, "bad text").into();
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn test_stage_failed_message() {
        let err = WorkerError::stage_failed("audio", "no chunk produced audio");
        assert_eq!(err.to_string(), "Stage audio failed: no chunk produced audio");
        assert!(!err.is_retryable());
    }
}
