use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Default maximum number of journal entries to keep in memory
pub const DEFAULT_MAX_LOG_LINES: usize = 10000;

/// Installs the global fmt subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Transferred,
    Skipped,
    Filtered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub category: LogCategory,
    pub message: String,
    pub directory: Option<PathBuf>,
}

/// Bounded in-memory journal of ingest outcomes.
#[derive(Clone)]
pub struct LogManager {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    max_lines: usize,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_LINES)
    }
}

impl LogManager {
    pub fn new(max_lines: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(max_lines.min(1024)))),
            max_lines,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log(&self, category: LogCategory, message: impl Into<String>, directory: Option<PathBuf>) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            category,
            message: message.into(),
            directory,
        };

        let mut entries = self.lock();
        entries.push_back(entry);
        // Remove from front if full
        while entries.len() > self.max_lines {
            entries.pop_front();
        }
    }

    pub fn get_logs(&self, directory: Option<&PathBuf>) -> Vec<LogEntry> {
        let entries = self.lock();
        match directory {
            Some(dir) => entries
                .iter()
                .filter(|e| e.directory.as_ref() == Some(dir))
                .cloned()
                .collect(),
            None => entries.iter().cloned().collect(),
        }
    }

    /// Get entries with pagination
    pub fn get_logs_paginated(&self, offset: usize, limit: usize) -> Vec<LogEntry> {
        let entries = self.lock();
        entries.iter().skip(offset).take(limit).cloned().collect()
    }

    pub fn count(&self, category: LogCategory) -> usize {
        self.lock().iter().filter(|e| e.category == category).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_manager_log() {
        let manager = LogManager::new(10);

        manager.log(LogCategory::Transferred, "moved a", None);
        assert_eq!(manager.len(), 1);

        manager.log(LogCategory::Failed, "b failed", Some(PathBuf::from("/watch")));
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.count(LogCategory::Failed), 1);
    }

    #[test]
    fn test_log_manager_rotation() {
        let manager = LogManager::new(3);

        for i in 0..5 {
            manager.log(LogCategory::Skipped, format!("message {}", i), None);
        }

        let logs = manager.get_logs(None);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message, "message 2");
    }

    #[test]
    fn test_log_manager_filters_by_directory() {
        let manager = LogManager::new(10);
        let watch = PathBuf::from("/watch");

        manager.log(LogCategory::Transferred, "a", None);
        manager.log(LogCategory::Transferred, "b", Some(watch.clone()));
        manager.log(LogCategory::Filtered, "c", Some(watch.clone()));

        assert_eq!(manager.get_logs(None).len(), 3);
        assert_eq!(manager.get_logs(Some(&watch)).len(), 2);
        assert!(manager.get_logs(Some(&PathBuf::from("/other"))).is_empty());
    }

    #[test]
    fn test_log_manager_pagination() {
        let manager = LogManager::new(100);
        for i in 0..20 {
            manager.log(LogCategory::Transferred, format!("message {}", i), None);
        }

        assert_eq!(manager.get_logs_paginated(0, 10).len(), 10);
        assert_eq!(manager.get_logs_paginated(10, 10).len(), 10);
        assert!(manager.get_logs_paginated(20, 10).is_empty());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing("debug");
        init_tracing("info");
    }
}
