//! ElevenLabs speech synthesis.

use std::path::Path;

use reel_models::VoiceConfig;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::{GenError, GenResult};
use crate::http::{check_status, normalize_base, HttpClientConfig};

pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f64,
    similarity_boost: f64,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

/// Text-to-speech client holding one pooled connection set.
#[derive(Debug, Clone)]
pub struct SpeechClient {
    http: Client,
    api_key: String,
    base_url: String,
    voice: VoiceConfig,
}

impl SpeechClient {
    pub fn new(api_key: impl Into<String>, voice: VoiceConfig, http: &HttpClientConfig) -> GenResult<Self> {
        Ok(Self {
            http: http.build()?,
            api_key: api_key.into(),
            base_url: ELEVENLABS_BASE_URL.to_string(),
            voice,
        })
    }

    /// Point the client at another host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base(base_url);
        self
    }

    /// Synthesize `text` and write the MP3 bytes to `output`.
    ///
    /// Returns the number of bytes written.
    pub async fn synthesize(&self, text: &str, output: &Path) -> GenResult<u64> {
        let url = format!("{}/text-to-speech/{}", self.base_url, self.voice.voice_id);
        let request = SpeechRequest {
            text,
            model_id: &self.voice.model_id,
            voice_settings: VoiceSettings {
                stability: self.voice.stability,
                similarity_boost: self.voice.similarity_boost,
            },
        };

        debug!(chars = text.chars().count(), "Requesting speech synthesis");
        let response = self
            .http
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let bytes = check_status(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(GenError::invalid_response("empty audio body"));
        }

        tokio::fs::write(output, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn voice() -> VoiceConfig {
        VoiceConfig {
            voice_id: "narrator".into(),
            ..VoiceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_synthesize_writes_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/text-to-speech/narrator"))
            .and(header("xi-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3 mp3".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("audio_chunk_0.mp3");
        let client = SpeechClient::new("secret", voice(), &HttpClientConfig::default())
            .unwrap()
            .with_base_url(server.uri());

        let written = client.synthesize("Olá mundo.", &output).await.unwrap();
        assert_eq!(written, 7);
        assert_eq!(std::fs::read(&output).unwrap(), b"ID3 mp3");
    }

    #[tokio::test]
    async fn test_rejected_text_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("text too long"))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let client = SpeechClient::new("secret", voice(), &HttpClientConfig::default())
            .unwrap()
            .with_base_url(server.uri());

        let err = client
            .synthesize("x", &dir.path().join("a.mp3"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let client = SpeechClient::new("secret", voice(), &HttpClientConfig::default())
            .unwrap()
            .with_base_url(server.uri());

        let err = client
            .synthesize("x", &dir.path().join("a.mp3"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
