//! Sidecar writer: one descriptor per content unit plus its images.
//!
//! Writing is skipped entirely when a descriptor already sits next to the
//! media. For remote modes every byte is staged under the configured temp
//! directory and pushed through the same operation used for media.

pub mod images;
pub mod nfo;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::{ScrapeConfig, TransferMode};
use crate::error::{IngestError, IngestResult};
use crate::identify::IdentifiedMeta;
use crate::metadata::{ContentRecord, ImageAttribute};
use crate::transfer::engine::with_fs_lock;
use crate::transfer::ops::FileOperation;

use images::{process_poster, ImageFetcher};

const DIRECTORY_DESCRIPTOR: &str = "movie.nfo";
const GALLERY_DIR: &str = "extrafanart";
/// Posters are always re-encoded as JPEG.
const POSTER_EXTENSION: &str = ".jpg";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidecarReport {
    pub skipped: bool,
    pub descriptor: Option<PathBuf>,
    pub images_written: usize,
    pub images_failed: usize,
}

pub struct SidecarWriter {
    config: ScrapeConfig,
    fetcher: ImageFetcher,
}

impl SidecarWriter {
    pub fn new(config: ScrapeConfig) -> IngestResult<Self> {
        let fetcher = ImageFetcher::new(config.retries)?;
        Ok(Self { config, fetcher })
    }

    /// Descriptor locations for a media path: file-level first, then directory-level.
    fn descriptor_paths(media: &Path) -> (PathBuf, PathBuf) {
        if media.is_dir() {
            let dir_level = media.join(DIRECTORY_DESCRIPTOR);
            (dir_level.clone(), dir_level)
        } else {
            let dir = media.parent().unwrap_or(Path::new("")).to_path_buf();
            (media.with_extension("nfo"), dir.join(DIRECTORY_DESCRIPTOR))
        }
    }

    /// Writes the descriptor and images for `media` (a file, or a directory
    /// for directory-mode transfers). Image failures are counted, not fatal.
    /// In remote modes every file is staged locally and handed to `push`,
    /// the same operation that transferred the media.
    pub async fn write_sidecar(
        &self,
        record: &ContentRecord,
        meta: &IdentifiedMeta,
        media: &Path,
        mode: TransferMode,
        push: Arc<dyn FileOperation>,
    ) -> IngestResult<SidecarReport> {
        let (file_level, dir_level) = Self::descriptor_paths(media);
        if file_level.exists() || dir_level.exists() {
            debug!(media = %media.display(), "descriptor already present, skipping sidecar");
            return Ok(SidecarReport {
                skipped: true,
                ..Default::default()
            });
        }

        let base_dir = dir_level
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let xml = nfo::render_nfo(record, meta);
        self.write_bytes(&file_level, xml.into_bytes(), mode, &push)
            .await
            .map_err(|e| IngestError::SidecarWriteFailure {
                path: file_level.clone(),
                message: e.to_string(),
            })?;

        let mut report = SidecarReport {
            descriptor: Some(file_level),
            ..Default::default()
        };

        let badge = if meta.subtitle { self.badge().await } else { None };
        for attr in record.image_attributes() {
            let target = image_target(&base_dir, &attr);
            if target.exists() {
                continue;
            }

            match self.fetch_image(&attr.url, attr.poster, badge.as_ref()).await {
                Ok(bytes) => match self.write_bytes(&target, bytes, mode, &push).await {
                    Ok(()) => report.images_written += 1,
                    Err(e) => {
                        warn!(target = %target.display(), "failed to write image: {e}");
                        report.images_failed += 1;
                    }
                },
                Err(e) => {
                    warn!(url = %attr.url, "failed to fetch image: {e}");
                    report.images_failed += 1;
                }
            }
        }

        info!(
            media = %media.display(),
            images = report.images_written,
            failed = report.images_failed,
            "sidecar written"
        );
        Ok(report)
    }

    async fn fetch_image(
        &self,
        url: &str,
        poster: bool,
        badge: Option<&Arc<DynamicImage>>,
    ) -> IngestResult<Vec<u8>> {
        let bytes = self.fetcher.fetch(url).await?;
        if !poster {
            return Ok(bytes);
        }
        let aspect = self.config.poster_aspect;
        let badge = badge.cloned();
        tokio::task::spawn_blocking(move || process_poster(&bytes, aspect, badge.as_deref()))
            .await
            .map_err(|e| IngestError::SidecarWriteFailure {
                path: PathBuf::from(url),
                message: e.to_string(),
            })?
    }

    /// Loads the subtitle badge, downloading it into the cache on first use.
    async fn badge(&self) -> Option<Arc<DynamicImage>> {
        let cache = &self.config.badge_cache;
        if !cache.exists() {
            let url = self.config.badge_url.as_ref()?;
            match self.fetcher.fetch(url).await {
                Ok(bytes) => {
                    if let Some(parent) = cache.parent().filter(|p| !p.as_os_str().is_empty()) {
                        let _ = fs::create_dir_all(parent).await;
                    }
                    if let Err(e) = fs::write(cache, bytes).await {
                        warn!(cache = %cache.display(), "failed to cache badge: {e}");
                        return None;
                    }
                }
                Err(e) => {
                    warn!(url, "failed to download badge: {e}");
                    return None;
                }
            }
        }
        match image::open(cache) {
            Ok(img) => Some(Arc::new(img)),
            Err(e) => {
                warn!(cache = %cache.display(), "badge is not a readable image: {e}");
                None
            }
        }
    }

    async fn write_bytes(
        &self,
        target: &Path,
        bytes: Vec<u8>,
        mode: TransferMode,
        push: &Arc<dyn FileOperation>,
    ) -> IngestResult<()> {
        if !mode.is_remote() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| IngestError::io("sidecar.create_dir", parent, e))?;
            }
            return fs::write(target, bytes)
                .await
                .map_err(|e| IngestError::io("sidecar.write", target, e));
        }

        let staged = self.stage_path(target);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| IngestError::io("sidecar.stage", parent, e))?;
        }
        fs::write(&staged, bytes)
            .await
            .map_err(|e| IngestError::io("sidecar.stage", &staged, e))?;

        let op = Arc::clone(push);
        let destination = target.to_path_buf();
        let pushed = staged.clone();
        with_fs_lock(move || op.apply(&pushed, &destination))
            .await
            .map_err(|e| IngestError::io("sidecar.push", target, e))?;

        if fs::try_exists(&staged).await.unwrap_or(false) {
            let _ = fs::remove_file(&staged).await;
        }
        Ok(())
    }

    /// Mirrors the destination path under the staging directory.
    fn stage_path(&self, target: &Path) -> PathBuf {
        let relative: PathBuf = target
            .components()
            .filter(|c| matches!(c, std::path::Component::Normal(_)))
            .collect();
        self.config.temp_dir.join(relative)
    }
}

/// Where an image attribute lands relative to the descriptor directory.
fn image_target(base_dir: &Path, attr: &ImageAttribute) -> PathBuf {
    let ext = if attr.poster {
        POSTER_EXTENSION.to_string()
    } else {
        image_extension(&attr.url)
    };
    let name = format!("{}{ext}", attr.name);
    if attr.sample {
        base_dir.join(GALLERY_DIR).join(name)
    } else {
        base_dir.join(name)
    }
}

fn image_extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 4 => format!(".{}", ext.to_lowercase()),
        _ => ".jpg".to_string(),
    }
}
