//! Chunk concatenation.

use std::path::Path;

use reel_models::{AudioChunk, MergedAudio};
use tracing::{info, warn};

use super::{AudioAssembler, MERGED_AUDIO_FILE};
use crate::command::{concat_list_entry, FfmpegCommand};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::remove_temp_file;

impl AudioAssembler {
    /// Concatenate chunks in index order without re-encoding.
    ///
    /// The reported duration is the sum of the chunk durations, not a measured length of
    /// the merged file. Chunks with an empty path are skipped.
    pub async fn merge(&self, chunks: &[AudioChunk], work_dir: &Path) -> MediaResult<MergedAudio> {
        let usable = usable_chunks(chunks);
        if usable.is_empty() {
            return Err(MediaError::empty_input("no audio chunks to merge"));
        }

        let output = work_dir.join(MERGED_AUDIO_FILE);
        let duration_ms: u64 = usable.iter().map(|c| c.duration_ms).sum();

        if usable.len() == 1 {
            tokio::fs::copy(&usable[0].path, &output).await?;
        } else {
            let list_path = work_dir.join("audio_concat.txt");
            tokio::fs::write(&list_path, build_concat_list(&usable)).await?;

            let cmd = FfmpegCommand::new(&output)
                .concat_list(&list_path)
                .stream_copy();
            self.runner("merge_audio", work_dir).run(&cmd).await?;
            remove_temp_file(&list_path).await;
        }

        info!(
            chunks = usable.len(),
            duration_ms = duration_ms,
            "Merged narration into {}",
            output.display()
        );

        Ok(MergedAudio {
            path: output,
            duration_ms,
            chunk_count: usable.len(),
        })
    }
}

fn usable_chunks(chunks: &[AudioChunk]) -> Vec<&AudioChunk> {
    let mut ordered: Vec<&AudioChunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);
    ordered
        .into_iter()
        .filter(|c| {
            if c.is_missing() {
                warn!(chunk = c.index, "Skipping audio chunk without a file");
                false
            } else {
                true
            }
        })
        .collect()
}

fn build_concat_list(chunks: &[&AudioChunk]) -> String {
    let mut list = String::new();
    for chunk in chunks {
        list.push_str(&concat_list_entry(&chunk.path));
        list.push('\n');
    }
    list
}
