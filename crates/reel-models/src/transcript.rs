//! Transcription results consumed by scene analysis and subtitles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum words grouped into one transcript segment.
pub const MAX_WORDS_PER_SEGMENT: usize = 15;

/// A single recognized word with timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Word {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(default)]
    pub confidence: f64,
}

impl Word {
    /// True if the word closes a sentence.
    pub fn ends_sentence(&self) -> bool {
        let text = self.text.trim_end();
        ['.', '!', '?', '。', '！', '？']
            .iter()
            .any(|c| text.ends_with(*c))
    }
}

/// A subtitle-sized run of words.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptSegment {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(default)]
    pub words: Vec<Word>,
}

/// Paragraph boundaries as reported by the transcription service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Paragraph {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transcription {
    pub segments: Vec<TranscriptSegment>,
    pub words: Vec<Word>,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
    pub full_text: String,
    pub duration_ms: u64,
    /// Mean word confidence
    pub confidence: f64,
    #[serde(default)]
    pub language: String,
}

impl Transcription {
    /// Build a transcription from timed words.
    ///
    /// Words are grouped into segments ending at a sentence boundary or after
    /// `MAX_WORDS_PER_SEGMENT` words.
    pub fn from_words(words: Vec<Word>, full_text: String, language: String) -> Self {
        let segments = group_into_segments(&words);
        let duration_ms = words.last().map(|w| w.end_ms).unwrap_or(0);
        let confidence = if words.is_empty() {
            0.0
        } else {
            words.iter().map(|w| w.confidence).sum::<f64>() / words.len() as f64
        };

        Self {
            segments,
            words,
            paragraphs: Vec::new(),
            full_text,
            duration_ms,
            confidence,
            language,
        }
    }
}

fn group_into_segments(words: &[Word]) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();
    let mut current: Vec<Word> = Vec::new();

    for word in words {
        current.push(word.clone());
        if word.ends_sentence() || current.len() >= MAX_WORDS_PER_SEGMENT {
            segments.push(segment_from(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        segments.push(segment_from(current));
    }

    segments
}

fn segment_from(words: Vec<Word>) -> TranscriptSegment {
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let start_ms = words.first().map(|w| w.start_ms).unwrap_or(0);
    let end_ms = words.last().map(|w| w.end_ms).unwrap_or(start_ms);
    TranscriptSegment {
        text,
        start_ms,
        end_ms,
        words,
    }
}
