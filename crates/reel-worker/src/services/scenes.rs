//! Local scene analysis from transcript timing.

use async_trait::async_trait;
use reel_models::{finalize_timeline, PipelineConfig, Scene, SceneAnalysis, Transcription, Word};
use tracing::debug;

use super::SceneAnalyzer;
use crate::error::{WorkerError, WorkerResult};

/// Builds scenes from sentence boundaries in the transcript.
///
/// Sentences are grouped `paragraphs_per_scene` at a time, oversized groups
/// are split and short ones merged into a neighbour while the result stays
/// within `max_scene_seconds`. Every scene gets the neutral mood.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParagraphSceneSplitter;

impl ParagraphSceneSplitter {
    pub fn new() -> Self {
        Self
    }

    /// Scenes for `transcription`, finalized against `narration_ms`.
    pub fn split(&self, transcription: &Transcription, narration_ms: u64, config: &PipelineConfig) -> Vec<Scene> {
        let total_ms = transcription.duration_ms.max(narration_ms);
        let style = config.images.style.trim();

        if transcription.words.is_empty() {
            let text = transcription.full_text.trim();
            if text.is_empty() || total_ms == 0 {
                return Vec::new();
            }
            let mut scene = Scene::new(0, text, 0, total_ms);
            scene.image_prompt = image_prompt(style, text);
            return vec![scene];
        }

        let min_ms = (config.scenes.min_scene_seconds * 1000.0) as u64;
        let max_ms = (config.scenes.max_scene_seconds * 1000.0).max(1.0) as u64;

        let groups: Vec<Vec<Word>> = sentences(&transcription.words)
            .chunks(config.scenes.paragraphs_per_scene.max(1))
            .map(|group| group.concat())
            .flat_map(|words| split_long(words, max_ms))
            .collect();
        let groups = merge_short(groups, min_ms, max_ms);

        let mut scenes: Vec<Scene> = groups
            .iter()
            .enumerate()
            .filter_map(|(index, words)| {
                let first = words.first()?;
                let last = words.last()?;
                let text = join_words(words);
                let mut scene = Scene::new(index, text, first.start_ms, last.end_ms);
                scene.image_prompt = image_prompt(style, &scene.text);
                Some(scene)
            })
            .collect();

        finalize_timeline(&mut scenes, total_ms);
        debug!(scenes = scenes.len(), total_ms, "Split transcript into scenes");
        scenes
    }
}

#[async_trait]
impl SceneAnalyzer for ParagraphSceneSplitter {
    async fn analyze(
        &self,
        transcription: &Transcription,
        narration_ms: u64,
        config: &PipelineConfig,
    ) -> WorkerResult<SceneAnalysis> {
        let scenes = self.split(transcription, narration_ms, config);
        if scenes.is_empty() {
            return Err(WorkerError::stage_failed("scenes", "transcript has no usable text"));
        }
        Ok(SceneAnalysis {
            style_guide: config.images.style.clone(),
            scenes,
            music_cues: Vec::new(),
        })
    }
}

fn image_prompt(style: &str, text: &str) -> String {
    if style.is_empty() {
        text.to_string()
    } else {
        format!("{}, {}", style, text)
    }
}

fn join_words(words: &[Word]) -> String {
    words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn span_ms(words: &[Word]) -> u64 {
    match (words.first(), words.last()) {
        (Some(first), Some(last)) => last.end_ms.saturating_sub(first.start_ms),
        _ => 0,
    }
}

/// Words grouped at sentence ends; trailing words form a last sentence.
fn sentences(words: &[Word]) -> Vec<Vec<Word>> {
    let mut sentences = Vec::new();
    let mut current = Vec::new();
    for word in words {
        current.push(word.clone());
        if word.ends_sentence() {
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

/// Cut a group longer than `max_ms` into roughly equal word runs.
fn split_long(words: Vec<Word>, max_ms: u64) -> Vec<Vec<Word>> {
    let span = span_ms(&words);
    if span <= max_ms || words.len() < 2 {
        return vec![words];
    }
    let parts = span.div_ceil(max_ms) as usize;
    let per_part = words.len().div_ceil(parts.min(words.len()));
    words.chunks(per_part).map(<[Word]>::to_vec).collect()
}

/// Fold groups shorter than `min_ms` into the previous group while the
/// combined span stays within `max_ms`.
fn merge_short(groups: Vec<Vec<Word>>, min_ms: u64, max_ms: u64) -> Vec<Vec<Word>> {
    let mut merged: Vec<Vec<Word>> = Vec::with_capacity(groups.len());
    for group in groups {
        if let Some(previous) = merged.last_mut() {
            let either_short = span_ms(previous) < min_ms || span_ms(&group) < min_ms;
            let combined = match (previous.first(), group.last()) {
                (Some(first), Some(last)) => last.end_ms.saturating_sub(first.start_ms),
                _ => 0,
            };
            if either_short && combined <= max_ms {
                previous.extend(group);
                continue;
            }
        }
        merged.push(group);
    }
    merged
}
