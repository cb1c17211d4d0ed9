//! Configuration loading.
//!
//! The YAML file is read once at startup; watched directories are derived from
//! it and stay immutable until the process is reconfigured or shut down.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{IngestError, IngestResult};
use crate::input_validation::{validate_exclude_keywords, validate_rename_format};
use crate::path_validation::{ensure_target_outside_source, validate_path};

pub const DEFAULT_RENAME_FORMAT: &str = "{year} {title}/{year} {title}{fileExt}";

pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".ts", ".iso", ".rmvb", ".avi", ".mov", ".mpeg", ".mpg", ".wmv", ".3gp",
    ".asf", ".m4v", ".flv", ".m2ts", ".strm", ".tp", ".f4v",
];

/// Physical operation used to relocate a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Move,
    Copy,
    Link,
    Softlink,
    #[serde(alias = "rclone_copy")]
    RemoteCopy,
    #[serde(alias = "rclone_move")]
    RemoteMove,
}

impl TransferMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Link => "link",
            Self::Softlink => "softlink",
            Self::RemoteCopy => "remote_copy",
            Self::RemoteMove => "remote_move",
        }
    }

    /// Remote modes target a mount abstraction and skip local existence checks.
    pub fn is_remote(self) -> bool {
        matches!(self, Self::RemoteCopy | Self::RemoteMove)
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "move" => Ok(Self::Move),
            "copy" => Ok(Self::Copy),
            "link" => Ok(Self::Link),
            "softlink" => Ok(Self::Softlink),
            "remote_copy" | "rclone_copy" => Ok(Self::RemoteCopy),
            "remote_move" | "rclone_move" => Ok(Self::RemoteMove),
            other => Err(IngestError::config(
                "watch_dirs",
                format!("unknown transfer mode `{other}`"),
            )),
        }
    }
}

/// Which watch engine backs a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEngine {
    /// Native OS notifications.
    #[default]
    Fast,
    /// Timed polling, for network shares that never deliver notifications.
    Compatibility,
}

/// Rule applied when a file-mode destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    Always,
    #[default]
    Size,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub quiet_period_secs: u64,
    pub flush_interval_secs: u64,
    pub webhook_url: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            quiet_period_secs: 10,
            flush_interval_secs: 15,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub enabled: bool,
    pub badge_url: Option<String>,
    pub badge_cache: PathBuf,
    pub poster_aspect: f32,
    pub temp_dir: PathBuf,
    pub retries: u32,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            badge_url: None,
            badge_cache: PathBuf::from("badge.png"),
            poster_aspect: 0.7,
            temp_dir: std::env::temp_dir().join("mediawatcher"),
            retries: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub base_url: String,
    pub rating_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub binary: String,
    pub prefix: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            binary: "rclone".to_string(),
            prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub watch_dirs: Vec<String>,
    pub default_mode: TransferMode,
    pub engine: WatchEngine,
    /// Per-source engine overrides, keyed by the watch line's source path.
    pub engines: HashMap<PathBuf, WatchEngine>,
    pub poll_interval_secs: u64,
    pub debounce_ms: u64,
    pub channel_capacity: usize,
    pub library_dir: Option<PathBuf>,
    pub exclude_keywords: Vec<String>,
    pub transfer_exclude_words: Vec<String>,
    pub media_extensions: Vec<String>,
    pub rename_format: String,
    pub overwrite: OverwritePolicy,
    pub cron: Option<String>,
    pub timezone: String,
    pub history_path: PathBuf,
    pub log_level: String,
    pub notify: NotifyConfig,
    pub scrape: ScrapeConfig,
    pub resolver: ResolverConfig,
    pub remote: RemoteConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_dirs: Vec::new(),
            default_mode: TransferMode::Link,
            engine: WatchEngine::Fast,
            engines: HashMap::new(),
            poll_interval_secs: 10,
            debounce_ms: 500,
            channel_capacity: 1024,
            library_dir: None,
            exclude_keywords: Vec::new(),
            transfer_exclude_words: Vec::new(),
            media_extensions: DEFAULT_MEDIA_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            rename_format: DEFAULT_RENAME_FORMAT.to_string(),
            overwrite: OverwritePolicy::Size,
            cron: None,
            timezone: "UTC".to_string(),
            history_path: PathBuf::from("mediawatcher-history.jsonl"),
            log_level: "info".to_string(),
            notify: NotifyConfig::default(),
            scrape: ScrapeConfig::default(),
            resolver: ResolverConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads and validates a YAML configuration file.
    pub fn load(path: &Path) -> IngestResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IngestError::io("config.read", path, e))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> IngestResult<Self> {
        let config: AppConfig = serde_yaml::from_str(raw)
            .map_err(|e| IngestError::config("yaml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> IngestResult<()> {
        validate_exclude_keywords(&self.exclude_keywords)
            .map_err(|e| IngestError::config("exclude_keywords", e.to_string()))?;
        validate_exclude_keywords(&self.transfer_exclude_words)
            .map_err(|e| IngestError::config("transfer_exclude_words", e.to_string()))?;
        validate_rename_format(&self.rename_format)
            .map_err(|e| IngestError::config("rename_format", e.to_string()))?;
        if self.channel_capacity == 0 {
            return Err(IngestError::config("channel_capacity", "must be at least 1"));
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(IngestError::config(
                "timezone",
                format!("unknown timezone `{}`", self.timezone),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Builds the watched directory list. Lines whose target sits inside
    /// their own source are skipped with a warning; grammar errors fail.
    pub fn watched_directories(&self) -> IngestResult<Vec<WatchedDirectory>> {
        let excludes = compile_keywords(&self.exclude_keywords, false)?;
        let mut dirs = Vec::new();

        for line in self.watch_dirs.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            let parsed = parse_watch_line(line, self.default_mode)?;
            validate_path(&parsed.source.to_string_lossy())
                .map_err(|e| IngestError::config("watch_dirs", e))?;

            if let Some(target) = &parsed.target {
                if let Err(e) = ensure_target_outside_source(&parsed.source, target) {
                    warn!(source = %parsed.source.display(), "{e}; directory not watched");
                    continue;
                }
            }

            let engine = self.engines.get(&parsed.source).copied().unwrap_or(self.engine);
            dirs.push(WatchedDirectory {
                engine,
                source: parsed.source,
                target: parsed.target,
                mode: parsed.mode,
                exclude_keywords: excludes.clone(),
            });
        }
        Ok(dirs)
    }
}

/// A configured source directory. Immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct WatchedDirectory {
    pub source: PathBuf,
    pub target: Option<PathBuf>,
    pub mode: TransferMode,
    pub exclude_keywords: Vec<Regex>,
    pub engine: WatchEngine,
}

impl WatchedDirectory {
    pub fn new(source: impl Into<PathBuf>, target: Option<PathBuf>, mode: TransferMode) -> Self {
        Self {
            source: source.into(),
            target,
            mode,
            exclude_keywords: Vec::new(),
            engine: WatchEngine::Fast,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchLine {
    pub source: PathBuf,
    pub target: Option<PathBuf>,
    pub mode: TransferMode,
}

/// Parses `path`, `path#mode`, `path:target` or `path:target#mode`.
pub fn parse_watch_line(line: &str, default_mode: TransferMode) -> IngestResult<WatchLine> {
    let (paths, mode) = match line.split_once('#') {
        Some((paths, mode)) if !mode.contains('#') => (paths, mode.parse()?),
        Some(_) => {
            return Err(IngestError::config(
                "watch_dirs",
                format!("more than one `#` in `{line}`"),
            ))
        }
        None => (line, default_mode),
    };

    let (source, target) = match separator_index(paths) {
        Some(idx) => (&paths[..idx], Some(&paths[idx + 1..])),
        None => (paths, None),
    };

    let source = source.trim();
    if source.is_empty() {
        return Err(IngestError::config(
            "watch_dirs",
            format!("missing source path in `{line}`"),
        ));
    }

    Ok(WatchLine {
        source: PathBuf::from(source),
        target: target
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(PathBuf::from),
        mode,
    })
}

/// Finds the `source:target` colon, skipping Windows drive-letter colons.
fn separator_index(paths: &str) -> Option<usize> {
    let bytes = paths.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b':')
        .map(|(idx, _)| idx)
        .find(|idx| !(*idx == 1 && bytes[0].is_ascii_alphabetic()))
}

/// Compiles keyword regexes; system-wide transfer words match case-insensitively.
pub fn compile_keywords(keywords: &[String], case_insensitive: bool) -> IngestResult<Vec<Regex>> {
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| {
            RegexBuilder::new(k)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|e| IngestError::config("exclude_keywords", e.to_string()))
        })
        .collect()
}
