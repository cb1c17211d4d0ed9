//! Event filter chain.
//!
//! Checks run in a fixed order and the first rejection wins. A rejection is a
//! classification, not a failure: the caller logs it and moves on.

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{compile_keywords, AppConfig, WatchedDirectory};
use crate::error::{IngestError, IngestResult};
use crate::transfer::cleanup::is_media_path;

/// Directory names NAS systems use for recycle bins and thumbnail caches.
const RECYCLE_MARKERS: &[&str] = &["@Recycle", "#recycle", "@eaDir"];

static BLURAY_STREAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)BDMV[/\\]STREAM").expect("bluray stream regex should compile"));

pub struct EventFilter {
    system_words: Vec<Regex>,
    media_extensions: Vec<String>,
}

impl EventFilter {
    pub fn new(config: &AppConfig) -> IngestResult<Self> {
        Ok(Self {
            system_words: compile_keywords(&config.transfer_exclude_words, true)?,
            media_extensions: config
                .media_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
        })
    }

    pub fn media_extensions(&self) -> &[String] {
        &self.media_extensions
    }

    /// Runs the chain for a path owned by `dir`.
    pub fn check(&self, path: &Path, dir: &WatchedDirectory) -> IngestResult<()> {
        if path.is_dir() {
            return Err(IngestError::Ignored {
                path: path.to_path_buf(),
                reason: "directory event",
            });
        }

        let relative = path.strip_prefix(&dir.source).unwrap_or(path);
        if touches_hidden_or_recycle(relative) {
            return Err(IngestError::Ignored {
                path: path.to_path_buf(),
                reason: "recycle bin or hidden path",
            });
        }

        let text = path.to_string_lossy();
        if let Some(keyword) = first_match(&dir.exclude_keywords, &text) {
            return Err(IngestError::FilteredByKeyword {
                path: path.to_path_buf(),
                keyword,
            });
        }
        if let Some(keyword) = first_match(&self.system_words, &text) {
            return Err(IngestError::FilteredByKeyword {
                path: path.to_path_buf(),
                keyword,
            });
        }

        if !is_media_path(path, &self.media_extensions) {
            return Err(IngestError::NotMedia {
                path: path.to_path_buf(),
            });
        }

        if BLURAY_STREAM.is_match(&text) {
            return Err(IngestError::Ignored {
                path: path.to_path_buf(),
                reason: "bluray stream files are not ingested individually",
            });
        }
        Ok(())
    }
}

fn first_match(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find(|re| re.is_match(text))
        .map(|re| re.as_str().to_string())
}

fn touches_hidden_or_recycle(relative: &Path) -> bool {
    relative.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || RECYCLE_MARKERS.contains(&name.as_ref())
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferMode;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup() -> (EventFilter, WatchedDirectory) {
        let config = AppConfig {
            transfer_exclude_words: vec!["trailer".to_string()],
            ..Default::default()
        };
        let mut dir = WatchedDirectory::new("/watch", None, TransferMode::Link);
        dir.exclude_keywords = compile_keywords(&["sample".to_string()], false).unwrap();
        (EventFilter::new(&config).unwrap(), dir)
    }

    #[test]
    fn test_accepts_media_file() {
        let (filter, dir) = setup();
        assert!(filter.check(Path::new("/watch/ABC-123.MP4"), &dir).is_ok());
    }

    #[test]
    fn test_rejects_hidden_and_recycle_paths() {
        let (filter, dir) = setup();
        for path in [
            "/watch/@Recycle/ABC-123.mp4",
            "/watch/#recycle/ABC-123.mp4",
            "/watch/.incomplete/ABC-123.mp4",
            "/watch/sub/@eaDir/ABC-123.mp4",
        ] {
            assert!(
                matches!(
                    filter.check(Path::new(path), &dir),
                    Err(IngestError::Ignored { .. })
                ),
                "{path}"
            );
        }
    }

    #[test]
    fn test_hidden_watch_root_is_not_a_marker() {
        let (filter, _) = setup();
        let dir = WatchedDirectory::new("/home/u/.downloads", None, TransferMode::Link);
        assert!(filter
            .check(Path::new("/home/u/.downloads/ABC-123.mp4"), &dir)
            .is_ok());
    }

    #[test]
    fn test_keyword_filters() {
        let (filter, dir) = setup();
        match filter.check(Path::new("/watch/ABC-123-sample.mp4"), &dir) {
            Err(IngestError::FilteredByKeyword { keyword, .. }) => assert_eq!(keyword, "sample"),
            other => panic!("unexpected {other:?}"),
        }
        // directory keywords are case-sensitive, system words are not
        assert!(filter.check(Path::new("/watch/ABC-123-SAMPLE.mp4"), &dir).is_ok());
        assert!(matches!(
            filter.check(Path::new("/watch/ABC-123 TRAILER.mp4"), &dir),
            Err(IngestError::FilteredByKeyword { .. })
        ));
    }

    #[test]
    fn test_rejects_non_media_and_bluray_streams() {
        let (filter, dir) = setup();
        assert!(matches!(
            filter.check(Path::new("/watch/ABC-123.nfo"), &dir),
            Err(IngestError::NotMedia { .. })
        ));
        assert!(matches!(
            filter.check(Path::new("/watch/ABC-123/BDMV/STREAM/00001.m2ts"), &dir),
            Err(IngestError::Ignored { .. })
        ));
        assert!(matches!(
            filter.check(Path::new("/watch/ABC-123/bdmv/stream/00001.m2ts"), &dir),
            Err(IngestError::Ignored { .. })
        ));
    }

    #[test]
    fn test_rejects_directories() {
        let (filter, _) = setup();
        let temp = TempDir::new().unwrap();
        let sub = temp.path().join("ABC-123.mp4");
        std::fs::create_dir(&sub).unwrap();
        let dir = WatchedDirectory::new(PathBuf::from(temp.path()), None, TransferMode::Link);
        assert!(matches!(
            filter.check(&sub, &dir),
            Err(IngestError::Ignored { .. })
        ));
    }
}
