//! Script splitting for speech synthesis.

use reel_models::TextChunk;

/// Default chunk size accepted by the speech service.
pub const DEFAULT_MAX_CHARS: usize = 2500;

/// Narration pace used for duration estimates.
const WORDS_PER_MINUTE: f64 = 150.0;

/// Cut points tried from the strongest to the weakest boundary.
const SEPARATORS: [&str; 7] = ["\n\n", "\n", ". ", "! ", "? ", "; ", ", "];

/// Splits a script into chunks of at most `max_chars` characters, preferring
/// paragraph and sentence boundaries.
#[derive(Debug, Clone)]
pub struct TextChunker {
    max_chars: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl TextChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Split `text` into trimmed, non-empty chunks indexed from zero.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        let mut remaining = text.trim();

        while !remaining.is_empty() {
            if remaining.chars().count() <= self.max_chars {
                push_chunk(&mut chunks, remaining);
                break;
            }

            let cut = self.cut_point(remaining);
            push_chunk(&mut chunks, &remaining[..cut]);
            remaining = remaining[cut..].trim_start();
        }

        chunks
    }

    /// Byte offset where the next chunk ends.
    fn cut_point(&self, text: &str) -> usize {
        let limit = text
            .char_indices()
            .nth(self.max_chars)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        let window = &text[..limit];

        for separator in SEPARATORS {
            if let Some(pos) = window.rfind(separator) {
                if pos > 0 {
                    return pos + separator.len();
                }
            }
        }

        match window.rfind(' ') {
            Some(pos) if pos > 0 => pos + 1,
            _ => limit,
        }
    }
}

fn push_chunk(chunks: &mut Vec<TextChunk>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        chunks.push(TextChunk {
            index: chunks.len(),
            text: text.to_string(),
        });
    }
}

/// Spoken duration of `text` in seconds at 150 words per minute.
pub fn estimate_duration(text: &str) -> f64 {
    let words = text.split_whitespace().count() as f64;
    words / WORDS_PER_MINUTE * 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(n: usize) -> String {
        format!("Esta é a frase número {} do roteiro de teste. ", n)
    }

    #[test]
    fn test_long_script_respects_limit() {
        let script: String = (0..80).map(sentence).collect();
        assert!(script.chars().count() > 3000);

        let chunks = TextChunker::default().chunk(&script);

        assert!(chunks.len() >= 2);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.char_count() <= DEFAULT_MAX_CHARS);
            assert!(chunk.text.ends_with('.'));
        }
        let rejoined: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rejoined.join(" "), script.trim());
    }

    #[test]
    fn test_paragraph_break_wins() {
        let text = "Primeiro parágrafo, com vírgula.\n\nSegundo parágrafo bem longo.";
        let chunks = TextChunker::new(45).chunk(text);
        assert_eq!(chunks[0].text, "Primeiro parágrafo, com vírgula.");
        assert_eq!(chunks[1].text, "Segundo parágrafo bem longo.");
    }

    #[test]
    fn test_falls_back_to_space_then_hard_cut() {
        let chunks = TextChunker::new(10).chunk("palavras sem pontuação nenhuma");
        assert!(chunks.iter().all(|c| c.char_count() <= 10));
        assert_eq!(chunks[0].text, "palavras");

        let chunks = TextChunker::new(4).chunk("abcdefghij");
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_multibyte_text_is_cut_on_char_boundary() {
        let text = "ãéíõú".repeat(10);
        let chunks = TextChunker::new(7).chunk(&text);
        assert!(chunks.iter().all(|c| c.char_count() <= 7));
        assert_eq!(chunks.iter().map(|c| c.char_count()).sum::<usize>(), 50);
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(TextChunker::default().chunk("  \n\n  ").is_empty());
    }

    #[test]
    fn test_estimate_duration() {
        let text = vec!["palavra"; 150].join(" ");
        assert_eq!(estimate_duration(&text), 60.0);
        assert_eq!(estimate_duration(""), 0.0);
    }
}
