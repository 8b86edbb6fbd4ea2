//! Adapters from the generation service clients to the pipeline traits.

use std::path::Path;

use async_trait::async_trait;
use reel_genai::{HttpClientConfig, ImageClient, MusicClient, SpeechClient, TranscriptionClient};
use reel_models::{GeneratedMusicConfig, ImageConfig, Transcription, VoiceConfig};

use super::{
    ImageGenerator, ImageProvider, MusicGenerator, MusicProvider, SpeechProvider,
    SpeechSynthesizer, Transcriber, TranscriptionProgress,
};
use crate::error::{WorkerError, WorkerResult};

fn require_key(name: &str, key: &str) -> WorkerResult<()> {
    if key.trim().is_empty() {
        return Err(WorkerError::config_error(format!("{} is not set", name)));
    }
    Ok(())
}

/// ElevenLabs speech synthesis.
#[derive(Debug, Clone)]
pub struct ElevenLabsProvider {
    api_key: String,
    base_url: Option<String>,
}

impl ElevenLabsProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

impl SpeechProvider for ElevenLabsProvider {
    fn connect(&self, voice: &VoiceConfig) -> WorkerResult<Box<dyn SpeechSynthesizer>> {
        require_key("ELEVENLABS_API_KEY", &self.api_key)?;
        let client = SpeechClient::new(&self.api_key, voice.clone(), &HttpClientConfig::default())?;
        let client = match &self.base_url {
            Some(url) => client.with_base_url(url),
            None => client,
        };
        Ok(Box::new(client))
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechClient {
    async fn synthesize(&self, text: &str, output: &Path) -> WorkerResult<()> {
        SpeechClient::synthesize(self, text, output).await?;
        Ok(())
    }
}

/// WaveSpeed text-to-image.
#[derive(Debug, Clone)]
pub struct WaveSpeedProvider {
    api_key: String,
    base_url: Option<String>,
}

impl WaveSpeedProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

impl ImageProvider for WaveSpeedProvider {
    fn connect(&self, images: &ImageConfig) -> WorkerResult<Box<dyn ImageGenerator>> {
        require_key("WAVESPEED_API_KEY", &self.api_key)?;
        let client = ImageClient::new(&self.api_key, images.clone(), &HttpClientConfig::default())?;
        let client = match &self.base_url {
            Some(url) => client.with_base_url(url),
            None => client,
        };
        Ok(Box::new(client))
    }
}

#[async_trait]
impl ImageGenerator for ImageClient {
    async fn generate(&self, prompt: &str, output: &Path) -> WorkerResult<()> {
        ImageClient::generate(self, prompt, output).await?;
        Ok(())
    }
}

/// Suno text-to-music.
#[derive(Debug, Clone)]
pub struct SunoProvider {
    api_key: String,
    base_url: Option<String>,
}

impl SunoProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

impl MusicProvider for SunoProvider {
    fn connect(&self, config: &GeneratedMusicConfig) -> WorkerResult<Box<dyn MusicGenerator>> {
        require_key("SUNO_API_KEY", &self.api_key)?;
        let client = MusicClient::new(&self.api_key, &HttpClientConfig::long_running())?
            .with_instrumental(config.instrumental);
        let client = match &self.base_url {
            Some(url) => client.with_base_url(url),
            None => client,
        };
        Ok(Box::new(client))
    }
}

#[async_trait]
impl MusicGenerator for MusicClient {
    async fn compose(&self, prompt: &str, duration_secs: f64, output: &Path) -> WorkerResult<()> {
        MusicClient::generate(self, prompt, duration_secs, output).await?;
        Ok(())
    }
}

/// AssemblyAI transcription; a client is opened per call.
#[derive(Debug, Clone)]
pub struct AssemblyAiTranscriber {
    api_key: String,
    base_url: Option<String>,
}

impl AssemblyAiTranscriber {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

#[async_trait]
impl Transcriber for AssemblyAiTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        on_progress: TranscriptionProgress<'_>,
    ) -> WorkerResult<Transcription> {
        require_key("ASSEMBLYAI_API_KEY", &self.api_key)?;
        let client = TranscriptionClient::new(&self.api_key, &HttpClientConfig::long_running())?;
        let client = match &self.base_url {
            Some(url) => client.with_base_url(url),
            None => client,
        };
        let transcription = client.transcribe(audio, language, on_progress).await?;
        Ok(transcription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_config_error() {
        let provider = ElevenLabsProvider::new("");
        assert!(matches!(
            provider.connect(&VoiceConfig::default()),
            Err(WorkerError::ConfigError(_))
        ));

        let provider = WaveSpeedProvider::new(" ");
        assert!(matches!(
            provider.connect(&ImageConfig::default()),
            Err(WorkerError::ConfigError(_))
        ));

        let err = SunoProvider::new("")
            .connect(&GeneratedMusicConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("SUNO_API_KEY"));
    }

    #[test]
    fn test_connect_with_key() {
        let provider = ElevenLabsProvider::new("key").with_base_url("http://localhost:1");
        assert!(provider.connect(&VoiceConfig::default()).is_ok());

        let provider = SunoProvider::new("key").with_base_url("http://localhost:1");
        assert!(provider.connect(&GeneratedMusicConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_transcriber_requires_key() {
        let transcriber = AssemblyAiTranscriber::new("");
        let err = transcriber
            .transcribe(Path::new("/nonexistent.mp3"), "pt", &|_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::ConfigError(_)));
    }
}
