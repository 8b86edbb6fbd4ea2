//! WaveSpeed text-to-image generation.

use std::path::Path;
use std::time::Duration;

use reel_models::ImageConfig;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GenError, GenResult};
use crate::http::{check_status, normalize_base, HttpClientConfig};

pub const WAVESPEED_BASE_URL: &str = "https://api.wavespeed.ai/api/v3";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_POLLS: u32 = 60;

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    num_images: u32,
}

/// Image URL in an immediate or completed response.
fn image_url(data: &Value) -> Option<String> {
    data.pointer("/output/images/0")
        .and_then(Value::as_str)
        .or_else(|| data.pointer("/images/0/url").and_then(Value::as_str))
        .or_else(|| data.pointer("/data/outputs/0").and_then(Value::as_str))
        .map(str::to_string)
}

/// Text-to-image client holding one pooled connection set.
#[derive(Debug, Clone)]
pub struct ImageClient {
    http: Client,
    api_key: String,
    base_url: String,
    config: ImageConfig,
    poll_interval: Duration,
    max_polls: u32,
}

impl ImageClient {
    pub fn new(api_key: impl Into<String>, config: ImageConfig, http: &HttpClientConfig) -> GenResult<Self> {
        Ok(Self {
            http: http.build()?,
            api_key: api_key.into(),
            base_url: WAVESPEED_BASE_URL.to_string(),
            config,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base(base_url);
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    /// Generate one image for `prompt` and download it to `output`.
    pub async fn generate(&self, prompt: &str, output: &Path) -> GenResult<()> {
        let url = format!("{}/wavespeed-ai/{}/txt2img", self.base_url, self.config.model);
        let request = ImageRequest {
            prompt,
            width: self.config.width,
            height: self.config.height,
            num_images: 1,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let data: Value = check_status(response).await?.json().await?;

        let image_url = match data.get("requestId").and_then(Value::as_str) {
            Some(request_id) => self.poll(request_id).await?,
            None => image_url(&data)
                .ok_or_else(|| GenError::invalid_response("no image url or requestId in response"))?,
        };

        debug!(url = %image_url, "Downloading generated image");
        let download = self.http.get(&image_url).send().await?;
        let bytes = check_status(download).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(GenError::invalid_response("empty image body"));
        }
        tokio::fs::write(output, &bytes).await?;
        Ok(())
    }

    async fn poll(&self, request_id: &str) -> GenResult<String> {
        let url = format!("{}/predictions/{}/result", self.base_url, request_id);

        for _ in 0..self.max_polls {
            let response = self.http.get(&url).bearer_auth(&self.api_key).send().await?;
            let data: Value = check_status(response).await?.json().await?;
            let status = data
                .get("status")
                .or_else(|| data.pointer("/data/status"))
                .and_then(Value::as_str)
                .unwrap_or_default();

            match status {
                "completed" => {
                    return image_url(&data)
                        .ok_or_else(|| GenError::invalid_response("completed result without image url"))
                }
                "failed" => {
                    let reason = data
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    return Err(GenError::GenerationFailed(reason.to_string()));
                }
                "pending" | "processing" | "starting" | "created" => {}
                other => warn!(request_id, status = other, "Unknown prediction status"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(GenError::PollExhausted(self.max_polls))
    }
}
