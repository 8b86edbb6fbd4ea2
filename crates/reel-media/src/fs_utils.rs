//! Filesystem helpers for encoder outputs.
//!
//! Final videos are moved from the job's temp directory into the output root,
//! which may live on another filesystem, so moves fall back to copy + delete on
//! EXDEV.

use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Smallest file accepted as a real encoder output.
pub const MIN_OUTPUT_BYTES: u64 = 1000;

/// Move a file from `src` to `dst`, handling cross-device moves.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// EXDEV is error code 18 on Linux/macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    // copy next to dst first so the final rename stays on one filesystem
    let staging = dst.with_extension("partial");

    fs::copy(src, &staging).await?;
    if let Err(e) = fs::rename(&staging, dst).await {
        remove_temp_file(&staging).await;
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        warn!("Failed to remove {} after copy: {}", src.display(), e);
    }
    Ok(())
}

/// Remove a scratch file (concat list, subtitle file, staging copy).
///
/// Failures other than the file already being gone are logged; the caller
/// carries on either way. Returns whether the file was removed.
pub async fn remove_temp_file(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove temp file {}: {}", path.display(), e);
            false
        }
    }
}

/// Size of `path` in bytes, or an error if it is missing or smaller than `min_bytes`.
pub async fn ensure_output(path: impl AsRef<Path>, min_bytes: u64) -> MediaResult<u64> {
    let path = path.as_ref();
    let size = match fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    if size < min_bytes {
        return Err(MediaError::OutputTooSmall {
            path: path.to_path_buf(),
            size,
        });
    }
    Ok(size)
}

/// Delete `previous` once `replacement` is confirmed on disk and non-empty.
///
/// Returns whether the previous file was removed. `previous` is kept when the
/// replacement is missing or when both paths are the same.
pub async fn replace_intermediate(previous: &Path, replacement: &Path) -> bool {
    if previous == replacement {
        return false;
    }
    if ensure_output(replacement, 1).await.is_err() {
        warn!(
            "Keeping {}: replacement {} is not on disk",
            previous.display(),
            replacement.display()
        );
        return false;
    }
    match fs::remove_file(previous).await {
        Ok(()) => true,
        Err(e) => {
            debug!("Could not remove intermediate {}: {}", previous.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_to_subdirectory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("composed.mp4");
        let dst = dir.path().join("output").join("final.mp4");

        fs::write(&src, b"video bytes").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"video bytes");
    }

    #[tokio::test]
    async fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }

    #[tokio::test]
    async fn test_ensure_output_rejects_small_files() {
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small.mp4");
        fs::write(&small, vec![0u8; 10]).await.unwrap();

        assert!(matches!(
            ensure_output(&small, MIN_OUTPUT_BYTES).await,
            Err(MediaError::OutputTooSmall { size: 10, .. })
        ));
        assert!(ensure_output(dir.path().join("missing.mp4"), 1).await.is_err());
        assert_eq!(ensure_output(&small, 5).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_remove_temp_file() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("audio_concat.txt");
        fs::write(&list, b"file 'a.mp3'").await.unwrap();

        assert!(remove_temp_file(&list).await);
        assert!(!list.exists());
        // already gone: nothing to report
        assert!(!remove_temp_file(&list).await);
        // a directory cannot be removed as a file; logged, not fatal
        assert!(!remove_temp_file(dir.path()).await);
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_replace_intermediate_only_after_replacement_exists() {
        let dir = TempDir::new().unwrap();
        let previous = dir.path().join("composed.mp4");
        let replacement = dir.path().join("with_subtitles.mp4");
        fs::write(&previous, b"old").await.unwrap();

        assert!(!replace_intermediate(&previous, &replacement).await);
        assert!(previous.exists());

        fs::write(&replacement, b"new").await.unwrap();
        assert!(replace_intermediate(&previous, &replacement).await);
        assert!(!previous.exists());
        assert!(replacement.exists());
    }
}
