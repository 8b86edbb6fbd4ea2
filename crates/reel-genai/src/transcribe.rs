//! AssemblyAI transcription with word timings.

use std::path::Path;
use std::time::Duration;

use reel_models::{Paragraph, Transcription, Word};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{GenError, GenResult};
use crate::http::{check_status, normalize_base, HttpClientConfig};

pub const ASSEMBLYAI_BASE_URL: &str = "https://api.assemblyai.com/v2";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RemoteWord {
    text: String,
    start: u64,
    end: u64,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    words: Option<Vec<RemoteWord>>,
    #[serde(default)]
    language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteParagraph {
    text: String,
    start: u64,
    end: u64,
}

#[derive(Debug, Deserialize)]
struct ParagraphsResponse {
    #[serde(default)]
    paragraphs: Vec<RemoteParagraph>,
}

/// Speech-to-text client.
#[derive(Debug, Clone)]
pub struct TranscriptionClient {
    http: Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
}

impl TranscriptionClient {
    pub fn new(api_key: impl Into<String>, http: &HttpClientConfig) -> GenResult<Self> {
        Ok(Self {
            http: http.build()?,
            api_key: api_key.into(),
            base_url: ASSEMBLYAI_BASE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base(base_url);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upload `audio`, wait for the transcript and group its words into segments.
    ///
    /// `language` is an ISO code or `auto` for detection. `on_progress`
    /// receives a phase label and a 0..1 fraction.
    pub async fn transcribe<F>(&self, audio: &Path, language: &str, on_progress: F) -> GenResult<Transcription>
    where
        F: Fn(&str, f64) + Send + Sync,
    {
        on_progress("uploading", 0.1);
        let bytes = tokio::fs::read(audio).await?;
        info!(bytes = bytes.len(), "Uploading narration for transcription");
        let response = self
            .http
            .post(format!("{}/upload", self.base_url))
            .header("authorization", &self.api_key)
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        let upload: UploadResponse = check_status(response).await?.json().await?;

        on_progress("queued", 0.2);
        let mut payload = json!({
            "audio_url": upload.upload_url,
            "punctuate": true,
            "format_text": true,
        });
        if language == "auto" {
            payload["language_detection"] = json!(true);
        } else {
            payload["language_code"] = json!(language);
        }
        let response = self
            .http
            .post(format!("{}/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&payload)
            .send()
            .await?;
        let submitted: SubmitResponse = check_status(response).await?.json().await?;
        debug!(transcript_id = %submitted.id, "Transcription submitted");

        let completed = self.wait_for(&submitted.id, &on_progress).await?;

        on_progress("fetching_paragraphs", 0.9);
        let paragraphs = self.paragraphs(&submitted.id).await;

        let words: Vec<Word> = completed
            .words
            .unwrap_or_default()
            .into_iter()
            .map(|w| Word {
                text: w.text,
                start_ms: w.start,
                end_ms: w.end,
                confidence: w.confidence,
            })
            .collect();
        let language = completed
            .language_code
            .unwrap_or_else(|| language.to_string());

        let mut transcription = Transcription::from_words(words, completed.text.unwrap_or_default(), language);
        transcription.paragraphs = paragraphs;

        on_progress("completed", 1.0);
        info!(
            words = transcription.words.len(),
            segments = transcription.segments.len(),
            "Transcription completed"
        );
        Ok(transcription)
    }

    async fn wait_for<F>(&self, id: &str, on_progress: &F) -> GenResult<TranscriptResponse>
    where
        F: Fn(&str, f64) + Send + Sync,
    {
        let url = format!("{}/transcript/{}", self.base_url, id);
        loop {
            let response = self
                .http
                .get(&url)
                .header("authorization", &self.api_key)
                .send()
                .await?;
            let data: TranscriptResponse = check_status(response).await?.json().await?;

            match data.status.as_str() {
                "completed" => return Ok(data),
                "error" => {
                    return Err(GenError::GenerationFailed(
                        data.error.unwrap_or_else(|| "unknown error".to_string()),
                    ))
                }
                "queued" => on_progress("queued", 0.3),
                other => on_progress(other, 0.6),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Paragraph boundaries; an empty list if the endpoint fails.
    async fn paragraphs(&self, id: &str) -> Vec<Paragraph> {
        let url = format!("{}/transcript/{}/paragraphs", self.base_url, id);
        let result = async {
            let response = self
                .http
                .get(&url)
                .header("authorization", &self.api_key)
                .send()
                .await?;
            let data: ParagraphsResponse = check_status(response).await?.json().await?;
            Ok::<_, GenError>(data.paragraphs)
        }
        .await;

        match result {
            Ok(paragraphs) => paragraphs
                .into_iter()
                .map(|p| Paragraph {
                    text: p.text,
                    start_ms: p.start,
                    end_ms: p.end,
                })
                .collect(),
            Err(e) => {
                warn!("Failed to fetch paragraphs, continuing without: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_upload_and_submit(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(header("authorization", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"upload_url": "https://cdn/a"})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/transcript"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "t1", "status": "queued"})))
            .mount(server)
            .await;
    }

    fn client(server: &MockServer) -> TranscriptionClient {
        TranscriptionClient::new("key", &HttpClientConfig::default())
            .unwrap()
            .with_base_url(server.uri())
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_transcribe_groups_words() {
        let server = MockServer::start().await;
        mount_upload_and_submit(&server).await;
        Mock::given(method("GET"))
            .and(path("/transcript/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "text": "Olá mundo. Tudo bem?",
                "language_code": "pt",
                "words": [
                    {"text": "Olá", "start": 0, "end": 400, "confidence": 0.9},
                    {"text": "mundo.", "start": 400, "end": 900, "confidence": 0.95},
                    {"text": "Tudo", "start": 1000, "end": 1300, "confidence": 0.9},
                    {"text": "bem?", "start": 1300, "end": 1700, "confidence": 0.8}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transcript/t1/paragraphs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "paragraphs": [{"text": "Olá mundo. Tudo bem?", "start": 0, "end": 1700}]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let audio = dir.path().join("audio.mp3");
        std::fs::write(&audio, b"mp3").unwrap();

        let phases = Mutex::new(Vec::new());
        let result = client(&server)
            .transcribe(&audio, "pt", |label, fraction| {
                phases.lock().unwrap().push((label.to_string(), fraction));
            })
            .await
            .unwrap();

        assert_eq!(result.words.len(), 4);
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].text, "Tudo bem?");
        assert_eq!(result.duration_ms, 1700);
        assert_eq!(result.paragraphs.len(), 1);
        assert_eq!(phases.lock().unwrap().last().unwrap().1, 1.0);
    }

    #[tokio::test]
    async fn test_transcription_error_is_reported() {
        let server = MockServer::start().await;
        mount_upload_and_submit(&server).await;
        Mock::given(method("GET"))
            .and(path("/transcript/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error",
                "error": "audio too short"
            })))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let audio = dir.path().join("audio.mp3");
        std::fs::write(&audio, b"mp3").unwrap();

        let err = client(&server)
            .transcribe(&audio, "auto", |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, GenError::GenerationFailed(ref m) if m == "audio too short"));
    }

    #[tokio::test]
    async fn test_missing_paragraphs_are_tolerated() {
        let server = MockServer::start().await;
        mount_upload_and_submit(&server).await;
        Mock::given(method("GET"))
            .and(path("/transcript/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "text": "Fim.",
                "words": [{"text": "Fim.", "start": 0, "end": 500, "confidence": 1.0}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transcript/t1/paragraphs"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let audio = dir.path().join("audio.mp3");
        std::fs::write(&audio, b"mp3").unwrap();

        let result = client(&server).transcribe(&audio, "pt", |_, _| {}).await.unwrap();
        assert!(result.paragraphs.is_empty());
        assert_eq!(result.language, "pt");
    }
}
