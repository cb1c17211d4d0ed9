//! Post-move cleanup of emptied source directories.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

fn has_media(dir: &Path, media_extensions: &[String]) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .any(|e| is_media_path(e.path(), media_extensions))
}

pub fn is_media_path(path: &Path, media_extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .is_some_and(|ext| media_extensions.iter().any(|m| m.eq_ignore_ascii_case(&ext)))
}

/// Walks up from `start`, deleting each level that holds no media files.
/// Stops at the first level with media, and never deletes `watch_root`
/// or anything outside it.
pub fn remove_empty_ancestors(
    start: &Path,
    watch_root: &Path,
    media_extensions: &[String],
) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    let mut current = Some(start);

    while let Some(dir) = current {
        if dir == watch_root || !dir.starts_with(watch_root) {
            break;
        }
        if !dir.is_dir() {
            current = dir.parent();
            continue;
        }
        if has_media(dir, media_extensions) {
            break;
        }
        match fs::remove_dir_all(dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "removed emptied source directory");
                removed.push(dir.to_path_buf());
            }
            Err(e) => {
                warn!(dir = %dir.display(), "failed to remove source directory: {e}");
                break;
            }
        }
        current = dir.parent();
    }
    removed
}
