//! Clients for the hosted generation services.
//!
//! Each client owns a pooled `reqwest::Client`; a stage builds one client and
//! drops it when the stage returns. Failures carry enough information for the
//! caller to decide whether another attempt can succeed
//! ([`GenError::is_retryable`]).

pub mod error;
pub mod http;
pub mod image;
pub mod music;
pub mod transcribe;
pub mod tts;

pub use error::{GenError, GenResult};
pub use http::HttpClientConfig;
pub use image::ImageClient;
pub use music::MusicClient;
pub use transcribe::TranscriptionClient;
pub use tts::SpeechClient;
