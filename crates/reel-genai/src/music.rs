//! Suno text-to-music generation.

use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GenError, GenResult};
use crate::http::{check_status, normalize_base, HttpClientConfig};

pub const SUNO_BASE_URL: &str = "https://api.suno.ai/v1";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_POLLS: u32 = 120;

#[derive(Debug, Serialize)]
struct MusicRequest<'a> {
    prompt: &'a str,
    duration: u64,
    make_instrumental: bool,
}

fn audio_url(data: &Value) -> Option<String> {
    data.get("audio_url")
        .and_then(Value::as_str)
        .or_else(|| data.pointer("/output/audio_url").and_then(Value::as_str))
        .map(str::to_string)
}

/// Music generation client holding one pooled connection set.
#[derive(Debug, Clone)]
pub struct MusicClient {
    http: Client,
    api_key: String,
    base_url: String,
    instrumental: bool,
    poll_interval: Duration,
    max_polls: u32,
}

impl MusicClient {
    pub fn new(api_key: impl Into<String>, http: &HttpClientConfig) -> GenResult<Self> {
        Ok(Self {
            http: http.build()?,
            api_key: api_key.into(),
            base_url: SUNO_BASE_URL.to_string(),
            instrumental: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base(base_url);
        self
    }

    pub fn with_instrumental(mut self, instrumental: bool) -> Self {
        self.instrumental = instrumental;
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    /// Compose a track of roughly `duration_secs` and download it to `output`.
    pub async fn generate(&self, prompt: &str, duration_secs: f64, output: &Path) -> GenResult<()> {
        let request = MusicRequest {
            prompt,
            duration: duration_secs.max(1.0).round() as u64,
            make_instrumental: self.instrumental,
        };
        let response = self
            .http
            .post(format!("{}/generate", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let data: Value = check_status(response).await?.json().await?;

        let generation_id = data
            .get("id")
            .or_else(|| data.get("generation_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| GenError::invalid_response("no generation id in response"))?;
        let track_url = self.poll(generation_id).await?;

        debug!(url = %track_url, "Downloading generated music");
        let download = self.http.get(&track_url).send().await?;
        let bytes = check_status(download).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(GenError::invalid_response("empty music body"));
        }
        tokio::fs::write(output, &bytes).await?;
        Ok(())
    }

    async fn poll(&self, generation_id: &str) -> GenResult<String> {
        let url = format!("{}/generations/{}", self.base_url, generation_id);

        for _ in 0..self.max_polls {
            let response = self.http.get(&url).bearer_auth(&self.api_key).send().await?;
            let data: Value = check_status(response).await?.json().await?;
            let status = data.get("status").and_then(Value::as_str).unwrap_or_default();

            match status {
                "completed" => {
                    return audio_url(&data)
                        .ok_or_else(|| GenError::invalid_response("completed generation without audio url"))
                }
                "failed" => {
                    let reason = data
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    return Err(GenError::GenerationFailed(reason.to_string()));
                }
                "queued" | "pending" | "processing" | "streaming" => {}
                other => warn!(generation_id, status = other, "Unknown generation status"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(GenError::PollExhausted(self.max_polls))
    }
}
