//! Completion notifications.
//!
//! Completions are grouped by (title, year) and held until the group goes
//! quiet, so a release that lands as several parts produces one message.
//! Singular content flushes on its first completion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indicatif::HumanBytes;
use serde::Serialize;
use tracing::info;

use crate::error::IngestResult;
use crate::identify::IdentifiedMeta;
use crate::metadata::{ContentRecord, MediaKind};
use crate::transfer::TransferResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub file_count: u64,
    pub total_size: u64,
    pub image: Option<String>,
}

impl Notification {
    pub fn failure(path: &Path, meta: &IdentifiedMeta, message: &str) -> Self {
        let code = meta.code().unwrap_or("unknown");
        Self {
            kind: NotificationKind::Failed,
            title: format!("{code} transfer failed"),
            body: format!("path: {}\nreason: {message}", path.display()),
            file_count: 1,
            total_size: 0,
            image: None,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> IngestResult<()>;
}

/// Writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> IngestResult<()> {
        info!(
            kind = ?notification.kind,
            files = notification.file_count,
            size = notification.total_size,
            "{}: {}",
            notification.title,
            notification.body.replace('\n', "; ")
        );
        Ok(())
    }
}

/// POSTs each notification as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> IngestResult<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    title: String,
    year: String,
}

struct PendingEntry {
    path: PathBuf,
    result: TransferResult,
}

struct PendingGroup {
    kind: MediaKind,
    record: ContentRecord,
    subtitle: bool,
    entries: Vec<PendingEntry>,
    last_update: Instant,
}

impl PendingGroup {
    fn compose(self) -> Notification {
        let file_count: u64 = self.entries.iter().map(|e| e.result.file_count.max(1)).sum();
        let total_size: u64 = self.entries.iter().map(|e| e.result.total_size).sum();
        let target = self
            .entries
            .last()
            .and_then(|e| e.result.target_path.as_ref())
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let mut body = format!(
            "code: {}\nactor: {}\nfiles: {file_count}\nsize: {}",
            self.record.code,
            self.record.primary_actor(),
            HumanBytes(total_size)
        );
        if self.subtitle {
            body.push_str("\nsubtitles: yes");
        }
        if !target.is_empty() {
            body.push_str(&format!("\ntarget: {target}"));
        }

        Notification {
            kind: NotificationKind::Completed,
            title: format!("{} added", self.record.title_year()),
            body,
            file_count,
            total_size,
            image: self.record.cover_image.clone(),
        }
    }
}

pub struct NotificationAggregator {
    groups: HashMap<GroupKey, PendingGroup>,
    quiet_period: Duration,
}

impl NotificationAggregator {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            groups: HashMap::new(),
            quiet_period,
        }
    }

    /// Adds a completion to its group. A path already in the group is not
    /// counted twice, but still refreshes the group's timer.
    pub fn on_transfer_complete(
        &mut self,
        path: &Path,
        meta: &IdentifiedMeta,
        record: &ContentRecord,
        result: &TransferResult,
        now: Instant,
    ) {
        let key = GroupKey {
            title: record.title.clone(),
            year: record.year.clone(),
        };
        let group = self.groups.entry(key).or_insert_with(|| PendingGroup {
            kind: record.kind,
            record: record.clone(),
            subtitle: false,
            entries: Vec::new(),
            last_update: now,
        });

        group.last_update = now;
        group.subtitle |= meta.subtitle;
        if group.entries.iter().all(|e| e.path != path) {
            group.entries.push(PendingEntry {
                path: path.to_path_buf(),
                result: result.clone(),
            });
        }
    }

    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    /// Removes and composes every group that is due at `now`.
    pub fn take_ready(&mut self, now: Instant) -> Vec<Notification> {
        let quiet = self.quiet_period;
        let mut due: Vec<GroupKey> = self
            .groups
            .iter()
            .filter(|(_, g)| g.kind.is_singular() || now.duration_since(g.last_update) > quiet)
            .map(|(k, _)| k.clone())
            .collect();
        due.sort_by(|a, b| (&a.title, &a.year).cmp(&(&b.title, &b.year)));

        due.into_iter()
            .filter_map(|key| self.groups.remove(&key))
            .map(PendingGroup::compose)
            .collect()
    }

    /// Flushes everything regardless of age, for shutdown.
    pub fn take_all(&mut self) -> Vec<Notification> {
        let mut groups: Vec<(GroupKey, PendingGroup)> = self.groups.drain().collect();
        groups.sort_by(|a, b| (&a.0.title, &a.0.year).cmp(&(&b.0.title, &b.0.year)));
        groups.into_iter().map(|(_, g)| g.compose()).collect()
    }
}
