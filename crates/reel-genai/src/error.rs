//! Generation client error types.

use thiserror::Error;

pub type GenResult<T> = Result<T, GenError>;

/// Longest response body kept in an error message.
const MAX_BODY_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum GenError {
    #[error("Service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Remote generation failed: {0}")]
    GenerationFailed(String),

    #[error("Result not ready after {0} polls")]
    PollExhausted(u32),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GenError {
    /// Build an HTTP error, keeping the start of the response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = match status {
            401 => "invalid or expired API key".to_string(),
            402 => "insufficient credits".to_string(),
            403 => "permission denied or credits exhausted".to_string(),
            429 => "rate limit exceeded".to_string(),
            _ if body.trim().is_empty() => format!("HTTP {}", status),
            _ => body.trim().chars().take(MAX_BODY_CHARS).collect(),
        };
        Self::Http { status, message }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// HTTP status, if the service answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            GenError::Http { status, .. } => Some(*status),
            GenError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Transient failures worth another attempt.
    ///
    /// Rejected input, bad credentials, missing credits and permission errors
    /// fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenError::Http { status, .. } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            GenError::Network(e) => match e.status() {
                Some(status) => matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504),
                None => true,
            },
            GenError::GenerationFailed(_) | GenError::PollExhausted(_) | GenError::Io(_) => true,
            GenError::InvalidResponse(_) | GenError::Json(_) => false,
        }
    }
}
