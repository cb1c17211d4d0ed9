//! Image download and poster processing.

use std::io::Cursor;
use std::time::Duration;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::{debug, warn};

use crate::error::{IngestError, IngestResult};

/// Badge width relative to the poster width.
const BADGE_SCALE: f32 = 0.35;

/// Center-crops `img` to `aspect` (width / height).
pub fn crop_to_aspect(img: &DynamicImage, aspect: f32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 || aspect <= 0.0 {
        return img.clone();
    }
    let src_aspect = w as f32 / h as f32;

    let (x, y, crop_w, crop_h) = if src_aspect > aspect {
        let crop_w = ((h as f32) * aspect).round() as u32;
        let crop_w = crop_w.clamp(1, w);
        ((w - crop_w) / 2, 0, crop_w, h)
    } else {
        let crop_h = ((w as f32) / aspect).round() as u32;
        let crop_h = crop_h.clamp(1, h);
        (0, (h - crop_h) / 2, w, crop_h)
    };
    img.crop_imm(x, y, crop_w, crop_h)
}

/// Composites `badge` onto the top-left corner, scaled to the poster width.
pub fn apply_badge(poster: &mut DynamicImage, badge: &DynamicImage) {
    if badge.width() == 0 || badge.height() == 0 {
        return;
    }
    let target_w = ((poster.width() as f32) * BADGE_SCALE).round().max(1.0) as u32;
    let target_h = ((target_w as f32) * badge.height() as f32 / badge.width() as f32)
        .round()
        .max(1.0) as u32;
    let scaled = badge.resize_exact(target_w, target_h, FilterType::Triangle);
    image::imageops::overlay(poster, &scaled, 0, 0);
}

pub fn encode_jpeg(img: &DynamicImage) -> IngestResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

/// Crops a downloaded poster and optionally badges it.
pub fn process_poster(
    bytes: &[u8],
    aspect: f32,
    badge: Option<&DynamicImage>,
) -> IngestResult<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let mut poster = crop_to_aspect(&img, aspect);
    if let Some(badge) = badge {
        apply_badge(&mut poster, badge);
    }
    encode_jpeg(&poster)
}

/// HTTP image fetcher with bounded retry on transport errors.
pub struct ImageFetcher {
    client: reqwest::Client,
    retries: u32,
}

impl ImageFetcher {
    pub fn new(retries: u32) -> IngestResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, retries })
    }

    pub async fn fetch(&self, url: &str) -> IngestResult<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_fetch(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt <= self.retries && is_transient(&e) => {
                    warn!(url, attempt, "image download failed, retrying: {e}");
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> IngestResult<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        debug!(url, size = bytes.len(), "image downloaded");
        Ok(bytes.to_vec())
    }
}

fn is_transient(err: &IngestError) -> bool {
    match err {
        IngestError::Http(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.is_request()
                || e.status().is_some_and(|s| s.is_server_error())
        }
        _ => false,
    }
}
