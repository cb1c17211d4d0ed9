//! Content records and the metadata resolver boundary.
//!
//! The resolver is an external collaborator: the pipeline only needs
//! `lookup(code) -> ContentRecord | not found`. `HttpMetadataResolver` talks to
//! a JSON catalogue API and optionally merges a secondary rating lookup.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::IngestResult;

const UNKNOWN: &str = "unknown";
const MAX_SAMPLE_IMAGES: usize = 30;

/// Whether completions of this content can be grouped before notifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Singular unit: nothing to aggregate, notify on the first completion.
    Movie,
    /// Coded release that may arrive as several parts.
    #[default]
    Release,
}

impl MediaKind {
    pub fn is_singular(self) -> bool {
        self == Self::Movie
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub thumb: Option<String>,
}

impl Person {
    fn unknown() -> Self {
        Self {
            id: "-1".to_string(),
            name: UNKNOWN.to_string(),
            thumb: None,
        }
    }
}

/// Resolved metadata for one identifier. Immutable once fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub code: String,
    pub kind: MediaKind,
    pub title: String,
    pub original_title: String,
    pub release_date: String,
    pub year: String,
    pub cover_image: Option<String>,
    pub thumb_image: Option<String>,
    pub rating: f32,
    pub actors: Vec<Person>,
    pub directors: Vec<Person>,
    pub tags: Vec<String>,
    pub producer: String,
    pub publisher: String,
    pub sample_images: Vec<String>,
}

/// One downloadable image attribute of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttribute {
    pub name: String,
    pub url: String,
    pub poster: bool,
    pub sample: bool,
}

impl ContentRecord {
    pub fn primary_actor(&self) -> &str {
        self.actors
            .first()
            .map(|a| a.name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN)
    }

    pub fn actor_names(&self) -> Vec<&str> {
        self.actors.iter().map(|a| a.name.as_str()).collect()
    }

    /// Title used in notifications and grouping.
    pub fn title_year(&self) -> String {
        if self.year.is_empty() {
            self.title.clone()
        } else {
            format!("{} ({})", self.title, self.year)
        }
    }

    /// The enumerated image attributes, in download order.
    pub fn image_attributes(&self) -> Vec<ImageAttribute> {
        let mut images = Vec::new();
        let mut push = |name: String, url: Option<&String>, poster: bool, sample: bool| {
            if let Some(url) = url.filter(|u| u.starts_with("http")) {
                images.push(ImageAttribute {
                    name,
                    url: url.clone(),
                    poster,
                    sample,
                });
            }
        };

        push("poster".to_string(), self.cover_image.as_ref(), true, false);
        push("background".to_string(), self.cover_image.as_ref(), false, false);
        push("poster_thumb".to_string(), self.thumb_image.as_ref(), false, false);
        for (idx, url) in self.sample_images.iter().take(MAX_SAMPLE_IMAGES).enumerate() {
            push(format!("sample{}", idx + 1), Some(url), false, true);
        }
        images
    }
}

#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Looks up a record; `Ok(None)` means the catalogue has no such code.
    async fn lookup(&self, code: &str) -> IngestResult<Option<ContentRecord>>;
}

#[derive(Debug, Deserialize)]
struct ApiNamed {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

impl ApiNamed {
    fn into_person(self) -> Option<Person> {
        let name = self.name.filter(|n| !n.trim().is_empty())?;
        Some(Person {
            id: self.id.unwrap_or_else(|| "-1".to_string()),
            name,
            thumb: self.avatar,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiSample {
    #[serde(default)]
    src: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMovie {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    img: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    director: Option<ApiNamed>,
    #[serde(default)]
    producer: Option<ApiNamed>,
    #[serde(default)]
    publisher: Option<ApiNamed>,
    #[serde(default)]
    genres: Vec<ApiNamed>,
    #[serde(default)]
    stars: Vec<ApiNamed>,
    #[serde(default)]
    samples: Vec<ApiSample>,
}

impl ApiMovie {
    fn into_record(self, requested: &str) -> Option<ContentRecord> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;
        let code = self.id.unwrap_or_else(|| requested.to_string());
        let release_date = self.date.unwrap_or_default().trim().to_string();
        let year = release_date.chars().take(4).collect::<String>();
        let thumb_image = self
            .img
            .as_ref()
            .map(|img| img.replace("cover", "thumb").replace("_b.jpg", ".jpg"));

        let mut actors: Vec<Person> = self
            .stars
            .into_iter()
            .filter_map(ApiNamed::into_person)
            .collect();
        if actors.is_empty() {
            actors.push(Person::unknown());
        }

        Some(ContentRecord {
            code,
            kind: MediaKind::Release,
            original_title: title.clone(),
            title,
            release_date,
            year,
            cover_image: self.img,
            thumb_image,
            rating: 0.0,
            actors,
            directors: self.director.and_then(ApiNamed::into_person).into_iter().collect(),
            tags: self
                .genres
                .into_iter()
                .filter_map(|g| g.name)
                .filter(|n| !n.is_empty())
                .collect(),
            producer: self
                .producer
                .and_then(|p| p.name)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            publisher: self
                .publisher
                .and_then(|p| p.name)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            sample_images: self
                .samples
                .into_iter()
                .filter_map(|s| s.src)
                .filter(|s| s.contains("http"))
                .take(MAX_SAMPLE_IMAGES)
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiRating {
    #[serde(default)]
    rating: Option<f32>,
}

/// Resolver backed by a JSON catalogue API (`{base_url}/api/movies/{code}`).
pub struct HttpMetadataResolver {
    client: reqwest::Client,
    base_url: String,
    rating_url: Option<String>,
}

impl HttpMetadataResolver {
    pub fn new(config: &ResolverConfig) -> IngestResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rating_url: config.rating_url.clone(),
        })
    }

    async fn lookup_rating(&self, code: &str) -> Option<f32> {
        let template = self.rating_url.as_ref()?;
        let url = template.replace("{code}", code);
        let response = match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(code, status = %resp.status(), "no rating available");
                return None;
            }
            Err(e) => {
                warn!(code, "rating lookup failed: {e}");
                return None;
            }
        };
        response.json::<ApiRating>().await.ok()?.rating
    }
}

#[async_trait]
impl MetadataResolver for HttpMetadataResolver {
    async fn lookup(&self, code: &str) -> IngestResult<Option<ContentRecord>> {
        let url = format!("{}/api/movies/{}", self.base_url, code);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let movie: ApiMovie = response.error_for_status()?.json().await?;

        let Some(mut record) = movie.into_record(code) else {
            return Ok(None);
        };
        info!(code, title = %record.title, "metadata resolved");

        if let Some(rating) = self.lookup_rating(code).await {
            record.rating = rating;
        }
        Ok(Some(record))
    }
}
