//! The ingestion actor.
//!
//! `Pipeline` owns the history ledger, the transfer engine and the pending
//! notification groups. Watchers only send `FileEvent`s; events are handled
//! one at a time, so the whole per-file routine (history check, identify,
//! resolve, transfer, record) is serialized without extra locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, TransferMode, WatchedDirectory};
use crate::error::{IngestError, IngestResult};
use crate::error_codes::{self, ERR_TRANSFER_FAILED};
use crate::filter::EventFilter;
use crate::history::TransferHistory;
use crate::identify::{identify_path, IdentifiedMeta};
use crate::logging::{LogCategory, LogManager};
use crate::metadata::{ContentRecord, HttpMetadataResolver, MetadataResolver};
use crate::notification::{
    LogNotifier, Notification, NotificationAggregator, Notifier, WebhookNotifier,
};
use crate::scheduler::FullSyncSchedule;
use crate::sidecar::SidecarWriter;
use crate::transfer::{TransferEngine, TransferPlan, TransferRequest, TransferResult};
use crate::watcher::{full_sync, FileEvent, FileEventKind};

pub fn event_channel(capacity: usize) -> (Sender<FileEvent>, Receiver<FileEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Counts from one full sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub transferred: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncSummary {
    pub fn record(&mut self, outcome: &IngestResult<TransferResult>) {
        match outcome {
            Ok(_) => self.transferred += 1,
            Err(e) if e.is_routine() || matches!(e, IngestError::FilteredByKeyword { .. }) => {
                self.skipped += 1
            }
            Err(_) => self.failed += 1,
        }
    }
}

pub struct Pipeline {
    dirs: Vec<Arc<WatchedDirectory>>,
    filter: EventFilter,
    history: TransferHistory,
    engine: TransferEngine,
    resolver: Arc<dyn MetadataResolver>,
    sidecar: Option<SidecarWriter>,
    aggregator: NotificationAggregator,
    notifier: Option<Arc<dyn Notifier>>,
    journal: LogManager,
    schedule: Option<FullSyncSchedule>,
    library_dir: Option<PathBuf>,
    rename_format: String,
    flush_interval: Duration,
}

impl Pipeline {
    /// Core pipeline without sidecars, notifications or a schedule.
    pub fn new(
        config: &AppConfig,
        dirs: Vec<Arc<WatchedDirectory>>,
        history: TransferHistory,
        resolver: Arc<dyn MetadataResolver>,
    ) -> IngestResult<Self> {
        Ok(Self {
            dirs,
            filter: EventFilter::new(config)?,
            history,
            engine: TransferEngine::new(config.overwrite, config.remote.clone()),
            resolver,
            sidecar: None,
            aggregator: NotificationAggregator::new(Duration::from_secs(
                config.notify.quiet_period_secs,
            )),
            notifier: None,
            journal: LogManager::default(),
            schedule: None,
            library_dir: config.library_dir.clone(),
            rename_format: config.rename_format.clone(),
            flush_interval: Duration::from_secs(config.notify.flush_interval_secs.max(1)),
        })
    }

    /// Fully wired pipeline for the daemon and CLI.
    pub fn from_config(config: &AppConfig) -> IngestResult<Self> {
        let dirs = config
            .watched_directories()?
            .into_iter()
            .map(Arc::new)
            .collect();
        let history = TransferHistory::open(&config.history_path)?;
        let resolver: Arc<dyn MetadataResolver> =
            Arc::new(HttpMetadataResolver::new(&config.resolver)?);
        let mut pipeline = Self::new(config, dirs, history, resolver)?;

        if config.scrape.enabled {
            pipeline.sidecar = Some(SidecarWriter::new(config.scrape.clone())?);
        }
        if config.notify.enabled {
            let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
                Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
                None => Arc::new(LogNotifier),
            };
            pipeline.notifier = Some(notifier);
        }
        if let Some(expr) = &config.cron {
            pipeline.schedule = Some(FullSyncSchedule::parse(expr, &config.timezone)?);
        }
        Ok(pipeline)
    }

    pub fn with_engine(mut self, engine: TransferEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_sidecar(mut self, sidecar: SidecarWriter) -> Self {
        self.sidecar = Some(sidecar);
        self
    }

    pub fn dirs(&self) -> &[Arc<WatchedDirectory>] {
        &self.dirs
    }

    pub fn history(&self) -> &TransferHistory {
        &self.history
    }

    pub fn journal(&self) -> &LogManager {
        &self.journal
    }

    pub fn pending_notifications(&self) -> usize {
        self.aggregator.pending_groups()
    }

    /// The watched directory owning `path`, longest source first.
    pub fn owner_of(&self, path: &Path) -> Option<Arc<WatchedDirectory>> {
        self.dirs
            .iter()
            .filter(|d| path.starts_with(&d.source))
            .max_by_key(|d| d.source.as_os_str().len())
            .cloned()
    }

    fn target_root(&self, dir: &WatchedDirectory) -> IngestResult<PathBuf> {
        dir.target
            .clone()
            .or_else(|| self.library_dir.clone())
            .ok_or_else(|| {
                IngestError::config(
                    "library_dir",
                    format!("no target for {}", dir.source.display()),
                )
            })
    }

    /// Runs one file event through the pipeline.
    pub async fn ingest(&mut self, event: &FileEvent) -> IngestResult<TransferResult> {
        let path = event.path.as_path();
        if !path.exists() {
            return Err(IngestError::NotFound {
                path: path.to_path_buf(),
            });
        }
        if self.history.already_processed(path) {
            return Err(IngestError::AlreadyProcessed {
                path: path.to_path_buf(),
            });
        }
        self.filter.check(path, &event.directory)?;

        let meta = identify_path(path);
        if meta.identifier.is_none() {
            return Err(IngestError::IdentificationFailed {
                path: path.to_path_buf(),
            });
        }
        self.process(path, &event.directory, meta).await
    }

    /// Ingests a whole release directory (e.g. a disc folder) in directory mode.
    pub async fn ingest_release_dir(
        &mut self,
        path: &Path,
        dir: &Arc<WatchedDirectory>,
    ) -> IngestResult<TransferResult> {
        if !path.is_dir() {
            return Err(IngestError::NotFound {
                path: path.to_path_buf(),
            });
        }
        if self.history.already_processed(path) {
            return Err(IngestError::AlreadyProcessed {
                path: path.to_path_buf(),
            });
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let meta = IdentifiedMeta::from_name(&name, path);
        if meta.identifier.is_none() {
            return Err(IngestError::IdentificationFailed {
                path: path.to_path_buf(),
            });
        }
        self.process(path, dir, meta).await
    }

    async fn resolve(&mut self, path: &Path, dir: &WatchedDirectory, meta: &IdentifiedMeta) -> IngestResult<ContentRecord> {
        let code = meta.code().unwrap_or_default().to_string();
        match self.resolver.lookup(&code).await? {
            Some(record) => Ok(record),
            None => {
                let message = format!("no metadata found for {code}");
                self.history
                    .record_failure(path, dir.mode, meta, None, None, &message)?;
                self.send_failure(path, meta, &message).await;
                Err(IngestError::MetadataNotFound { code })
            }
        }
    }

    async fn process(
        &mut self,
        path: &Path,
        dir: &Arc<WatchedDirectory>,
        meta: IdentifiedMeta,
    ) -> IngestResult<TransferResult> {
        let target_root = self.target_root(dir)?;
        let record = self.resolve(path, dir, &meta).await?;
        let was_dir = path.is_dir();

        let request = TransferRequest {
            source: path,
            meta: &meta,
            record: &record,
            mode: dir.mode,
            target_root: &target_root,
            template: &self.rename_format,
        };
        let result = self.engine.transfer(&request).await;

        if !result.success {
            self.history
                .record_failure(path, dir.mode, &meta, Some(&record), Some(&result), &result.message)?;
            self.send_failure(path, &meta, &result.message).await;

            let code = result
                .error_code
                .clone()
                .unwrap_or_else(|| ERR_TRANSFER_FAILED.to_string());
            return Err(if error_codes::is_conflict(&code) {
                IngestError::NamingConflict {
                    path: path.to_path_buf(),
                    message: result.message,
                }
            } else {
                IngestError::PhysicalTransferFailure {
                    path: path.to_path_buf(),
                    code,
                    message: result.message,
                }
            });
        }

        self.history
            .record_success(path, dir.mode, &meta, &record, &result)?;

        if let (Some(writer), Some(target)) = (&self.sidecar, result.target_path.as_deref()) {
            let push = self.engine.operation(dir.mode);
            if let Err(e) = writer
                .write_sidecar(&record, &meta, target, dir.mode, push)
                .await
            {
                warn!(path = %path.display(), "{e}");
            }
        }

        if self.notifier.is_some() {
            self.aggregator
                .on_transfer_complete(path, &meta, &record, &result, Instant::now());
        }

        if dir.mode == TransferMode::Move {
            let start = if was_dir { Some(path) } else { path.parent() };
            if let Some(start) = start {
                let removed = self
                    .engine
                    .cleanup_after_move(start, &dir.source, self.filter.media_extensions())
                    .await;
                if !removed.is_empty() {
                    debug!(count = removed.len(), "cleaned up emptied source directories");
                }
            }
        }
        Ok(result)
    }

    /// Ingests an event and logs its classification at the matching level.
    pub async fn handle_event(&mut self, event: &FileEvent) -> IngestResult<TransferResult> {
        let outcome = self.ingest(event).await;
        let dir = Some(event.directory.source.clone());

        match &outcome {
            Ok(result) => {
                info!(
                    path = %event.path.display(),
                    target = ?result.target_path,
                    kind = ?event.kind,
                    "ingested"
                );
                self.journal
                    .log(LogCategory::Transferred, result.message.clone(), dir);
            }
            Err(IngestError::FilteredByKeyword { path, keyword }) => {
                info!(path = %path.display(), keyword, "filtered by keyword");
                self.journal.log(LogCategory::Filtered, outcome_message(&outcome), dir);
            }
            Err(IngestError::Ignored { path, reason }) if reason.starts_with("bluray") => {
                info!(path = %path.display(), "{reason}");
                self.journal.log(LogCategory::Filtered, outcome_message(&outcome), dir);
            }
            Err(e) if e.is_routine() => {
                debug!("{e}");
                self.journal.log(LogCategory::Skipped, e.to_string(), dir);
            }
            Err(e) => {
                warn!("{e}");
                self.journal.log(LogCategory::Failed, e.to_string(), dir);
            }
        }
        outcome
    }

    /// `ingest_release_dir` with the same logging as `handle_event`.
    pub async fn handle_release_dir(
        &mut self,
        path: &Path,
        dir: &Arc<WatchedDirectory>,
    ) -> IngestResult<TransferResult> {
        let outcome = self.ingest_release_dir(path, dir).await;
        match &outcome {
            Ok(result) => {
                info!(path = %path.display(), files = result.file_count, bluray = result.is_bluray, "release ingested");
                self.journal.log(
                    LogCategory::Transferred,
                    result.message.clone(),
                    Some(dir.source.clone()),
                );
            }
            Err(e) => {
                warn!("{e}");
                self.journal
                    .log(LogCategory::Failed, e.to_string(), Some(dir.source.clone()));
            }
        }
        outcome
    }

    /// Resolves and plans an event without transferring or recording anything.
    pub async fn dry_run(&self, event: &FileEvent) -> IngestResult<(IdentifiedMeta, TransferPlan)> {
        let path = event.path.as_path();
        if !path.exists() {
            return Err(IngestError::NotFound {
                path: path.to_path_buf(),
            });
        }
        if self.history.already_processed(path) {
            return Err(IngestError::AlreadyProcessed {
                path: path.to_path_buf(),
            });
        }
        self.filter.check(path, &event.directory)?;
        let meta = identify_path(path);
        let code = meta.code().map(str::to_string).ok_or_else(|| {
            IngestError::IdentificationFailed {
                path: path.to_path_buf(),
            }
        })?;
        let found = self.resolver.lookup(&code).await?;
        let record = found.ok_or(IngestError::MetadataNotFound { code })?;
        let target_root = self.target_root(&event.directory)?;

        let plan = self.engine.plan(&TransferRequest {
            source: path,
            meta: &meta,
            record: &record,
            mode: event.directory.mode,
            target_root: &target_root,
            template: &self.rename_format,
        });
        Ok((meta, plan))
    }

    /// Synthesized events for one directory, or for a single path inside it.
    pub fn sync_events(&self, dir: &Arc<WatchedDirectory>, only: Option<&Path>) -> Vec<FileEvent> {
        match only {
            Some(path) if path.is_file() => vec![FileEvent {
                path: path.to_path_buf(),
                directory: Arc::clone(dir),
                kind: FileEventKind::Created,
            }],
            Some(path) => {
                let mut scoped = (**dir).clone();
                scoped.source = path.to_path_buf();
                full_sync(&Arc::new(scoped), self.filter.media_extensions())
                    .into_iter()
                    .map(|mut e| {
                        e.directory = Arc::clone(dir);
                        e
                    })
                    .collect()
            }
            None => full_sync(dir, self.filter.media_extensions()),
        }
    }

    /// Full resync of every watched directory. Stops between files once
    /// `shutdown` fires; the file in hand is finished first.
    pub async fn full_sync_all(&mut self, shutdown: &CancellationToken) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let dirs = self.dirs.clone();
        'dirs: for dir in &dirs {
            let events = self.sync_events(dir, None);
            info!(source = %dir.source.display(), files = events.len(), "full sync");
            for event in &events {
                if shutdown.is_cancelled() {
                    info!("full sync interrupted by shutdown");
                    break 'dirs;
                }
                let outcome = self.handle_event(event).await;
                summary.record(&outcome);
            }
        }
        self.flush_notifications(false).await;
        summary
    }

    async fn send(&self, notification: &Notification) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.send(notification).await {
                warn!(title = %notification.title, "notification failed: {e}");
            }
        }
    }

    async fn send_failure(&self, path: &Path, meta: &IdentifiedMeta, message: &str) {
        if self.notifier.is_some() {
            self.send(&Notification::failure(path, meta, message)).await;
        }
    }

    /// Sends due groups, or every group when `force` is set.
    pub async fn flush_notifications(&mut self, force: bool) {
        let ready = if force {
            self.aggregator.take_all()
        } else {
            self.aggregator.take_ready(Instant::now())
        };
        for notification in &ready {
            self.send(notification).await;
        }
    }

    fn next_full_sync(&self) -> Option<Duration> {
        self.schedule
            .as_ref()
            .and_then(|s| s.duration_until_next(Utc::now()))
    }

    /// Consumes events until the channel closes or `shutdown` fires. An event
    /// being handled when shutdown arrives is finished first.
    pub async fn run(mut self, mut events: Receiver<FileEvent>, shutdown: CancellationToken) -> Self {
        let mut flush = tokio::time::interval(self.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next_sync = self.next_full_sync();
            let sync_due = async move {
                match next_sync {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        let _ = self.handle_event(&event).await;
                    }
                    None => break,
                },
                _ = flush.tick() => self.flush_notifications(false).await,
                _ = sync_due => {
                    let summary = self.full_sync_all(&shutdown).await;
                    info!(?summary, "scheduled full sync finished");
                }
            }
        }

        self.flush_notifications(true).await;
        info!("ingestion loop stopped");
        self
    }
}

fn outcome_message(outcome: &IngestResult<TransferResult>) -> String {
    match outcome {
        Ok(result) => result.message.clone(),
        Err(e) => e.to_string(),
    }
}
