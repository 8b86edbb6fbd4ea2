//! Narration and image generators for the stage executor.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use reel_media::{audio_duration_ms, AudioAssembler};
use reel_models::{AudioChunk, GeneratedImage, Scene, TextChunk};
use tracing::warn;

use crate::error::WorkerError;
use crate::generation::StageGenerator;
use crate::services::{estimate_duration, ImageGenerator, SpeechSynthesizer};

/// Shortest silence used in place of a failed chunk.
const MIN_PLACEHOLDER_SECS: f64 = 1.0;

/// Synthesizes one MP3 per text chunk.
pub struct AudioStage {
    synthesizer: Box<dyn SpeechSynthesizer>,
    assembler: AudioAssembler,
    work_dir: PathBuf,
}

impl AudioStage {
    pub fn new(synthesizer: Box<dyn SpeechSynthesizer>, assembler: AudioAssembler, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            synthesizer,
            assembler,
            work_dir: work_dir.into(),
        }
    }

    fn chunk_path(&self, index: usize) -> PathBuf {
        self.work_dir.join(format!("audio_chunk_{:03}.mp3", index))
    }
}

#[async_trait]
impl StageGenerator for AudioStage {
    type Item = TextChunk;
    type Artifact = AudioChunk;

    fn stage(&self) -> &'static str {
        "audio"
    }

    async fn generate(&self, chunk: &TextChunk) -> Result<AudioChunk, WorkerError> {
        let started = Instant::now();
        let path = self.chunk_path(chunk.index);
        self.synthesizer.synthesize(&chunk.text, &path).await?;

        let duration_ms = match audio_duration_ms(&path).await {
            Ok(ms) if ms > 0 => ms,
            Ok(_) | Err(_) => {
                let estimate = (estimate_duration(&chunk.text) * 1000.0) as u64;
                warn!(
                    index = chunk.index,
                    estimate_ms = estimate,
                    "Could not read chunk duration, using estimate"
                );
                estimate
            }
        };

        Ok(AudioChunk {
            index: chunk.index,
            path,
            duration_ms,
            text: chunk.text.clone(),
            generation_time_ms: started.elapsed().as_millis() as u64,
            placeholder: false,
        })
    }

    /// Silence of the chunk's estimated length; a missing marker if even
    /// that cannot be written.
    async fn placeholder(&self, chunk: &TextChunk, error: &str) -> AudioChunk {
        let seconds = estimate_duration(&chunk.text).max(MIN_PLACEHOLDER_SECS);
        let path = self.work_dir.join(format!("audio_chunk_{:03}_silence.mp3", chunk.index));
        warn!(index = chunk.index, "Narration chunk failed ({}), inserting {:.1}s of silence", error, seconds);

        match self.assembler.silence_clip(seconds, &path).await {
            Ok(()) => AudioChunk {
                index: chunk.index,
                path,
                duration_ms: (seconds * 1000.0) as u64,
                text: chunk.text.clone(),
                generation_time_ms: 0,
                placeholder: true,
            },
            Err(e) => {
                warn!(index = chunk.index, "Silence placeholder failed, chunk will be skipped: {}", e);
                AudioChunk {
                    index: chunk.index,
                    path: PathBuf::new(),
                    duration_ms: 0,
                    text: chunk.text.clone(),
                    generation_time_ms: 0,
                    placeholder: true,
                }
            }
        }
    }
}

/// Generates one image per scene.
pub struct ImageStage {
    generator: Box<dyn ImageGenerator>,
    work_dir: PathBuf,
}

impl ImageStage {
    pub fn new(generator: Box<dyn ImageGenerator>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            generator,
            work_dir: work_dir.into(),
        }
    }
}

fn prompt_for(scene: &Scene) -> &str {
    if scene.image_prompt.trim().is_empty() {
        &scene.text
    } else {
        &scene.image_prompt
    }
}

#[async_trait]
impl StageGenerator for ImageStage {
    type Item = Scene;
    type Artifact = GeneratedImage;

    fn stage(&self) -> &'static str {
        "images"
    }

    async fn generate(&self, scene: &Scene) -> Result<GeneratedImage, WorkerError> {
        let started = Instant::now();
        let prompt = prompt_for(scene);
        let path = self.work_dir.join(format!("scene_{:03}.png", scene.index));
        self.generator.generate(prompt, &path).await?;

        Ok(GeneratedImage {
            scene_index: scene.index,
            path,
            prompt_used: prompt.to_string(),
            generation_time_ms: started.elapsed().as_millis() as u64,
            placeholder: false,
        })
    }

    async fn placeholder(&self, scene: &Scene, _error: &str) -> GeneratedImage {
        GeneratedImage::placeholder(scene.index, prompt_for(scene))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationStageExecutor, RetryPolicy};
    use crate::services::TextChunker;
    use reel_genai::GenError;
    use std::path::Path;
    use tempfile::TempDir;

    struct FakeSpeech {
        reject: Option<usize>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSpeech {
        async fn synthesize(&self, text: &str, output: &Path) -> Result<(), WorkerError> {
            if self.reject.map(|i| text.contains(&format!("#{} ", i))).unwrap_or(false) {
                return Err(GenError::from_status(422, "unsupported characters").into());
            }
            tokio::fs::write(output, text.as_bytes()).await?;
            Ok(())
        }
    }

    struct FakeImages;

    #[async_trait]
    impl ImageGenerator for FakeImages {
        async fn generate(&self, prompt: &str, output: &Path) -> Result<(), WorkerError> {
            if prompt.contains("forbidden") {
                return Err(GenError::from_status(400, "content policy").into());
            }
            tokio::fs::write(output, b"PNG").await?;
            Ok(())
        }
    }

    fn script() -> String {
        (0..60)
            .map(|i| format!("Frase #{} com algumas palavras para narrar. ", i))
            .collect()
    }

    #[tokio::test]
    async fn test_one_audio_chunk_per_text_chunk() {
        let dir = TempDir::new().unwrap();
        let text = script();
        assert!(text.chars().count() >= 2_500);

        let chunks = TextChunker::default().chunk(&text);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.char_count() <= 2_500));

        let stage = AudioStage::new(Box::new(FakeSpeech { reject: None }), AudioAssembler::new(), dir.path());
        let executor = GenerationStageExecutor::new(RetryPolicy::immediate(2, 1), 100);
        let audio = executor.generate_all(&stage, &chunks, 3, |_, _| {}).await;

        assert_eq!(audio.len(), chunks.len());
        for (chunk, artifact) in chunks.iter().zip(&audio) {
            assert_eq!(artifact.index, chunk.index);
            assert_eq!(artifact.text, chunk.text);
            assert!(!artifact.placeholder);
            assert!(artifact.duration_ms > 0);
            assert!(artifact.path.exists());
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_its_slot() {
        let dir = TempDir::new().unwrap();
        let chunks = TextChunker::new(60).chunk(&script());
        let stage = AudioStage::new(Box::new(FakeSpeech { reject: Some(1) }), AudioAssembler::new(), dir.path());
        let executor = GenerationStageExecutor::new(RetryPolicy::immediate(2, 1), 100);

        let audio = executor.generate_all(&stage, &chunks, 2, |_, _| {}).await;

        assert_eq!(audio.len(), chunks.len());
        assert!(audio[1].placeholder);
        assert_eq!(audio[1].index, 1);
        assert!(!audio[0].placeholder);
    }

    #[tokio::test]
    async fn test_rejected_prompt_becomes_placeholder_image() {
        let dir = TempDir::new().unwrap();
        let mut scenes = vec![Scene::new(0, "a lighthouse", 0, 3_000), Scene::new(1, "forbidden", 3_000, 6_000)];
        scenes[0].image_prompt = "oil painting, a lighthouse".into();

        let stage = ImageStage::new(Box::new(FakeImages), dir.path());
        let executor = GenerationStageExecutor::new(RetryPolicy::immediate(3, 2), 100);
        let images = executor.generate_all(&stage, &scenes, 2, |_, _| {}).await;

        assert_eq!(images.len(), 2);
        assert_eq!(images[0].prompt_used, "oil painting, a lighthouse");
        assert!(images[0].usable_path().is_some());
        assert!(images[1].placeholder);
        assert_eq!(images[1].prompt_used, "forbidden");
    }
}
