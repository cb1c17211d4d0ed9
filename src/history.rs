//! Transfer history ledger.
//!
//! One JSON object per line, appended as transfers finish. The source path is
//! a unique key: once a path has an entry, later attempts are no-ops. On load,
//! the first entry for a path wins.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TransferMode;
use crate::error::{IngestError, IngestResult};
use crate::identify::IdentifiedMeta;
use crate::metadata::ContentRecord;
use crate::transfer::TransferResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferHistoryEntry {
    pub source_path: PathBuf,
    pub mode: TransferMode,
    pub success: bool,
    pub meta: IdentifiedMeta,
    pub record: Option<ContentRecord>,
    pub result: Option<TransferResult>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub struct TransferHistory {
    path: Option<PathBuf>,
    entries: Vec<TransferHistoryEntry>,
    index: HashMap<PathBuf, usize>,
}

impl TransferHistory {
    /// Opens (or starts) a ledger file. Unparseable lines are skipped.
    pub fn open(path: impl Into<PathBuf>) -> IngestResult<Self> {
        let path = path.into();
        let mut history = Self {
            path: Some(path.clone()),
            entries: Vec::new(),
            index: HashMap::new(),
        };

        if !path.exists() {
            return Ok(history);
        }

        let file = fs::File::open(&path).map_err(|e| IngestError::io("history.open", &path, e))?;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| IngestError::io("history.read", &path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TransferHistoryEntry>(&line) {
                Ok(entry) => {
                    history.insert(entry);
                }
                Err(e) => warn!(line = line_no + 1, "skipping malformed history line: {e}"),
            }
        }
        debug!(path = %path.display(), entries = history.entries.len(), "history loaded");
        Ok(history)
    }

    /// A ledger that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn insert(&mut self, entry: TransferHistoryEntry) -> bool {
        if self.index.contains_key(&entry.source_path) {
            return false;
        }
        self.index
            .insert(entry.source_path.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn already_processed(&self, source: &Path) -> bool {
        self.index.contains_key(source)
    }

    pub fn get(&self, source: &Path) -> Option<&TransferHistoryEntry> {
        self.index.get(source).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[TransferHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_success(
        &mut self,
        source: &Path,
        mode: TransferMode,
        meta: &IdentifiedMeta,
        record: &ContentRecord,
        result: &TransferResult,
    ) -> IngestResult<bool> {
        self.append(TransferHistoryEntry {
            source_path: source.to_path_buf(),
            mode,
            success: true,
            meta: meta.clone(),
            record: Some(record.clone()),
            result: Some(result.clone()),
            message: result.message.clone(),
            timestamp: Utc::now(),
        })
    }

    pub fn record_failure(
        &mut self,
        source: &Path,
        mode: TransferMode,
        meta: &IdentifiedMeta,
        record: Option<&ContentRecord>,
        result: Option<&TransferResult>,
        message: impl Into<String>,
    ) -> IngestResult<bool> {
        self.append(TransferHistoryEntry {
            source_path: source.to_path_buf(),
            mode,
            success: false,
            meta: meta.clone(),
            record: record.cloned(),
            result: result.cloned(),
            message: message.into(),
            timestamp: Utc::now(),
        })
    }

    /// Returns false (and writes nothing) when the path already has an entry.
    fn append(&mut self, entry: TransferHistoryEntry) -> IngestResult<bool> {
        if self.already_processed(&entry.source_path) {
            return Ok(false);
        }
        if let Some(path) = &self.path {
            let line = serde_json::to_string(&entry)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| IngestError::io("history.append", path, e))?;
            writeln!(file, "{line}").map_err(|e| IngestError::io("history.append", path, e))?;
        }
        Ok(self.insert(entry))
    }

    /// Drops the entry for `source` and rewrites the ledger without it.
    pub fn forget(&mut self, source: &Path) -> IngestResult<bool> {
        if !self.already_processed(source) {
            return Ok(false);
        }
        let kept: Vec<TransferHistoryEntry> = self
            .entries
            .drain(..)
            .filter(|e| e.source_path != source)
            .collect();
        self.index.clear();
        for entry in kept {
            self.insert(entry);
        }

        if let Some(path) = &self.path {
            self.rewrite(path)?;
        }
        Ok(true)
    }

    fn rewrite(&self, path: &Path) -> IngestResult<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| IngestError::io("history.compact", dir, e))?;
        for entry in &self.entries {
            let line = serde_json::to_string(entry)?;
            writeln!(tmp, "{line}").map_err(|e| IngestError::io("history.compact", path, e))?;
        }
        tmp.persist(path)
            .map_err(|e| IngestError::io("history.compact", path, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta() -> IdentifiedMeta {
        IdentifiedMeta {
            identifier: Some("ABC-123".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_second_record_is_noop() {
        let mut history = TransferHistory::in_memory();
        let path = Path::new("/watch/ABC-123.mp4");
        let result = TransferResult {
            success: true,
            ..Default::default()
        };

        assert!(history
            .record_success(path, TransferMode::Copy, &meta(), &ContentRecord::default(), &result)
            .unwrap());
        assert!(!history
            .record_failure(path, TransferMode::Copy, &meta(), None, None, "again")
            .unwrap());

        assert_eq!(history.len(), 1);
        assert!(history.get(path).unwrap().success);
    }

    #[test]
    fn test_persisted_ledger_reloads() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("history.jsonl");
        let path = Path::new("/watch/ABC-123.mp4");

        {
            let mut history = TransferHistory::open(&file).unwrap();
            history
                .record_failure(path, TransferMode::Move, &meta(), None, None, "no metadata")
                .unwrap();
        }

        let history = TransferHistory::open(&file).unwrap();
        assert!(history.already_processed(path));
        let entry = history.get(path).unwrap();
        assert!(!entry.success);
        assert_eq!(entry.message, "no metadata");
    }

    #[test]
    fn test_duplicate_lines_first_wins_and_garbage_skipped() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("history.jsonl");
        let entry = |success: bool| TransferHistoryEntry {
            source_path: PathBuf::from("/watch/a.mp4"),
            mode: TransferMode::Copy,
            success,
            meta: meta(),
            record: None,
            result: None,
            message: String::new(),
            timestamp: Utc::now(),
        };
        let content = format!(
            "{}\nnot json\n{}\n",
            serde_json::to_string(&entry(true)).unwrap(),
            serde_json::to_string(&entry(false)).unwrap()
        );
        fs::write(&file, content).unwrap();

        let history = TransferHistory::open(&file).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history.entries()[0].success);
    }

    #[test]
    fn test_forget_compacts_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("history.jsonl");
        let mut history = TransferHistory::open(&file).unwrap();
        for name in ["/watch/a.mp4", "/watch/b.mp4"] {
            history
                .record_failure(Path::new(name), TransferMode::Copy, &meta(), None, None, "x")
                .unwrap();
        }

        assert!(history.forget(Path::new("/watch/a.mp4")).unwrap());
        assert!(!history.forget(Path::new("/watch/a.mp4")).unwrap());

        let reloaded = TransferHistory::open(&file).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.already_processed(Path::new("/watch/b.mp4")));
        assert!(!reloaded.already_processed(Path::new("/watch/a.mp4")));
    }
}
