//! Error taxonomy for the ingestion pipeline.
//!
//! Per-file classifications (`NotFound` through `SidecarWriteFailure`) are
//! handled where they occur: logged, optionally recorded in history, and the
//! loop moves on. The remaining variants cover configuration, watcher and
//! transport failures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source path no longer exists: {path:?}")]
    NotFound { path: PathBuf },

    #[error("not a media file: {path:?}")]
    NotMedia { path: PathBuf },

    #[error("{path:?} matches exclude keyword `{keyword}`")]
    FilteredByKeyword { path: PathBuf, keyword: String },

    #[error("{path:?} ignored: {reason}")]
    Ignored { path: PathBuf, reason: &'static str },

    #[error("already processed: {path:?}")]
    AlreadyProcessed { path: PathBuf },

    #[error("no content identifier in {path:?}")]
    IdentificationFailed { path: PathBuf },

    #[error("no metadata found for {code}")]
    MetadataNotFound { code: String },

    #[error("naming conflict at {path:?}: {message}")]
    NamingConflict { path: PathBuf, message: String },

    #[error("transfer of {path:?} failed [{code}]: {message}")]
    PhysicalTransferFailure {
        path: PathBuf,
        code: String,
        message: String,
    },

    #[error("sidecar for {path:?} failed: {message}")]
    SidecarWriteFailure { path: PathBuf, message: String },

    #[error("invalid configuration `{field}`: {message}")]
    Config { field: &'static str, message: String },

    #[error("watcher for {path:?} failed to start")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("{operation} failed for {path:?}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("http request failed")]
    Http(#[from] reqwest::Error),

    #[error("json encoding failed")]
    Json(#[from] serde_json::Error),

    #[error("image processing failed")]
    Image(#[from] image::ImageError),
}

impl IngestError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn config(field: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            field,
            message: message.into(),
        }
    }

    /// Classifications that are routine noise and only worth a debug line.
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::NotMedia { .. }
                | Self::Ignored { .. }
                | Self::AlreadyProcessed { .. }
                | Self::IdentificationFailed { .. }
        )
    }
}
