use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::TransferMode;
use crate::identify::IdentifiedMeta;
use crate::metadata::ContentRecord;

/// Inputs of one transfer call.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    pub source: &'a Path,
    pub meta: &'a IdentifiedMeta,
    pub record: &'a ContentRecord,
    pub mode: TransferMode,
    pub target_root: &'a Path,
    pub template: &'a str,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferShape {
    File,
    Directory,
}

/// What happens at the destination, decided once per call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum OverwriteDecision {
    /// Destination is free.
    Create,
    /// Destination exists and will be deleted first.
    Replace,
    /// The transfer will not run.
    Reject { code: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferPlan {
    pub source: PathBuf,
    /// Rendered file path (file mode) or mirrored parent (directory mode).
    pub destination: PathBuf,
    pub mode: TransferMode,
    pub shape: TransferShape,
    pub decision: OverwriteDecision,
}

impl TransferPlan {
    pub(crate) fn rejected(
        source: &Path,
        mode: TransferMode,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.to_path_buf(),
            destination: PathBuf::new(),
            mode,
            shape: TransferShape::File,
            decision: OverwriteDecision::Reject {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferResult {
    pub success: bool,
    pub message: String,
    pub source: PathBuf,
    pub target_path: Option<PathBuf>,
    pub total_size: u64,
    pub file_count: u64,
    pub is_bluray: bool,
    pub file_list: Vec<PathBuf>,
    pub file_list_new: Vec<PathBuf>,
    pub error_code: Option<String>,
}

impl TransferResult {
    pub fn failure(source: &Path, code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            source: source.to_path_buf(),
            error_code: Some(code.to_string()),
            ..Default::default()
        }
    }
}
