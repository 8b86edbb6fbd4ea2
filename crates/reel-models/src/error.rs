//! Error types for model loading and validation.

use std::path::PathBuf;
use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<validator::ValidationErrors> for ModelError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ModelError::InvalidConfig(errors.to_string())
    }
}
