//! 파일 시스템 감시 관리 모듈
//!
//! One notify watcher per watched directory. Raw notifications are debounced
//! on a per-directory thread and forwarded as `FileEvent`s into the shared
//! bounded ingestion channel. A directory created or moved into the tree
//! only produces one notification for itself, so directories are expanded
//! into their files when the batch is flushed.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{WatchEngine, WatchedDirectory};
use crate::error::{IngestError, IngestResult};
use crate::error_codes::ERR_WATCH_START_FAILED;
use crate::transfer::cleanup::is_media_path;

/// Raw notifications buffered per directory before debouncing.
const RAW_EVENT_BUFFER: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Moved,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub directory: Arc<WatchedDirectory>,
    pub kind: FileEventKind,
}

/// Maps a notify event to the path and kind we ingest, if any.
fn classify(event: &Event) -> Option<(PathBuf, FileEventKind)> {
    match event.kind {
        EventKind::Create(_) => event.paths.first().cloned().map(|p| (p, FileEventKind::Created)),
        // Both carries [from, to]; the last path is the new name.
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => {
            event.paths.last().cloned().map(|p| (p, FileEventKind::Moved))
        }
        _ => None,
    }
}

/// Replaces directory entries with the regular files beneath them. Files
/// keep their own kind when they were also reported individually.
fn expand_directories(
    pending: impl IntoIterator<Item = (PathBuf, FileEventKind)>,
) -> BTreeMap<PathBuf, FileEventKind> {
    let mut files = BTreeMap::new();
    let mut dirs = Vec::new();
    for (path, kind) in pending {
        if path.is_dir() {
            dirs.push((path, kind));
        } else {
            files.insert(path, kind);
        }
    }
    for (dir, kind) in dirs {
        for entry in WalkDir::new(&dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                files.entry(entry.into_path()).or_insert(kind);
            }
        }
    }
    files
}

/// Whether a start failure is the OS watch limit (inotify `max_user_watches`).
pub fn is_watch_limit(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::MaxFilesWatch => true,
        notify::ErrorKind::Io(io) => io.raw_os_error() == Some(28),
        _ => false,
    }
}

/// 단일 디렉토리의 Watcher 정보
pub struct DirectoryWatcher {
    pub source_path: PathBuf,
    _watcher: Box<dyn Watcher + Send>,
    cancellation_token: CancellationToken,
    _debounce_thread_handle: Option<thread::JoinHandle<()>>,
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

/// 여러 디렉토리의 Watcher를 관리하는 매니저
pub struct WatcherManager {
    watchers: HashMap<PathBuf, DirectoryWatcher>,
    debounce: Duration,
    poll_interval: Duration,
}

impl WatcherManager {
    pub fn new(debounce: Duration, poll_interval: Duration) -> Self {
        Self {
            watchers: HashMap::new(),
            debounce,
            poll_interval,
        }
    }

    /// Starts watching `dir`, forwarding debounced events into `events`.
    pub fn start_watching(
        &mut self,
        dir: Arc<WatchedDirectory>,
        events: Sender<FileEvent>,
    ) -> IngestResult<()> {
        // 이미 감시 중이면 중지 후 재시작
        self.stop_watching(&dir.source);

        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();
        let (raw_tx, raw_rx) = sync_channel::<Event>(RAW_EVENT_BUFFER);

        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if classify(&event).is_some() && raw_tx.try_send(event).is_err() {
                    debug!("raw event buffer full, dropping notification");
                }
            }
            Err(e) => warn!("watch error: {e}"),
        };

        let start_err = |source| IngestError::Watch {
            path: dir.source.clone(),
            source,
        };
        let mut watcher: Box<dyn Watcher + Send> = match dir.engine {
            WatchEngine::Fast => Box::new(notify::recommended_watcher(handler).map_err(start_err)?),
            WatchEngine::Compatibility => Box::new(
                PollWatcher::new(
                    handler,
                    notify::Config::default().with_poll_interval(self.poll_interval),
                )
                .map_err(start_err)?,
            ),
        };
        watcher
            .watch(&dir.source, RecursiveMode::Recursive)
            .map_err(start_err)?;

        let debounce = self.debounce;
        let thread_dir = Arc::clone(&dir);
        let thread_handle = thread::spawn(move || {
            let mut pending: HashMap<PathBuf, FileEventKind> = HashMap::new();
            loop {
                if token.is_cancelled() {
                    break;
                }

                // 첫 이벤트 대기
                match raw_rx.recv_timeout(debounce) {
                    Ok(event) => {
                        if let Some((path, kind)) = classify(&event) {
                            pending.insert(path, kind);
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                // 조용한 구간: 수집된 이벤트 전달
                for (path, kind) in expand_directories(pending.drain()) {
                    let event = FileEvent {
                        path,
                        directory: Arc::clone(&thread_dir),
                        kind,
                    };
                    match events.try_send(event) {
                        Ok(()) => {}
                        Err(TrySendError::Full(dropped)) => warn!(
                            path = %dropped.path.display(),
                            "ingestion queue full, dropping event (next full sync recovers it)"
                        ),
                        Err(TrySendError::Closed(_)) => return,
                    }
                }
            }
        });

        info!(
            source = %dir.source.display(),
            engine = ?dir.engine,
            mode = %dir.mode,
            "watching directory"
        );
        self.watchers.insert(
            dir.source.clone(),
            DirectoryWatcher {
                source_path: dir.source.clone(),
                _watcher: watcher,
                cancellation_token,
                _debounce_thread_handle: Some(thread_handle),
            },
        );
        Ok(())
    }

    /// Starts every directory; a failure only disables that directory.
    pub fn start_all(
        &mut self,
        dirs: &[Arc<WatchedDirectory>],
        events: &Sender<FileEvent>,
    ) -> usize {
        let mut started = 0;
        for dir in dirs {
            match self.start_watching(Arc::clone(dir), events.clone()) {
                Ok(()) => started += 1,
                Err(IngestError::Watch { path, source }) if is_watch_limit(&source) => warn!(
                    code = ERR_WATCH_START_FAILED,
                    path = %path.display(),
                    "watch limit reached; raise fs.inotify.max_user_watches or use the compatibility engine"
                ),
                Err(e) => warn!(code = ERR_WATCH_START_FAILED, "{e}"),
            }
        }
        started
    }

    pub fn stop_watching(&mut self, source: &Path) -> bool {
        match self.watchers.remove(source) {
            Some(watcher) => {
                watcher.cancellation_token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, source: &Path) -> bool {
        self.watchers.contains_key(source)
    }

    pub fn watching(&self) -> Vec<PathBuf> {
        self.watchers.keys().cloned().collect()
    }

    pub fn stop_all(&mut self) {
        for (_, watcher) in self.watchers.drain() {
            watcher.cancellation_token.cancel();
        }
    }
}

impl Drop for WatcherManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Synthesizes one `Created` event per media file under the directory.
pub fn full_sync(dir: &Arc<WatchedDirectory>, media_extensions: &[String]) -> Vec<FileEvent> {
    let mut paths: Vec<PathBuf> = WalkDir::new(&dir.source)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_media_path(p, media_extensions))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| FileEvent {
            path,
            directory: Arc::clone(dir),
            kind: FileEventKind::Created,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferMode;
    use std::fs;
    use tempfile::tempdir;

    fn media() -> Vec<String> {
        vec![".mp4".to_string()]
    }

    #[test]
    fn test_full_sync_enumerates_media_recursively() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("a/b/ABC-123.mp4"), b"x").unwrap();
        fs::write(temp.path().join("a/readme.txt"), b"x").unwrap();
        fs::write(temp.path().join("XYZ-999.MP4"), b"x").unwrap();

        let dir = Arc::new(WatchedDirectory::new(temp.path(), None, TransferMode::Link));
        let events = full_sync(&dir, &media());

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == FileEventKind::Created));
        assert!(events.iter().any(|e| e.path.ends_with("a/b/ABC-123.mp4")));
    }

    #[test]
    fn test_classify_rename_uses_destination() {
        let event = Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            paths: vec![PathBuf::from("/w/tmp.part"), PathBuf::from("/w/ABC-123.mp4")],
            attrs: Default::default(),
        };
        assert_eq!(
            classify(&event),
            Some((PathBuf::from("/w/ABC-123.mp4"), FileEventKind::Moved))
        );

        let removal = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/w/a.mp4")],
            attrs: Default::default(),
        };
        assert_eq!(classify(&removal), None);
    }

    #[test]
    fn test_expand_directories_lists_nested_files_once() {
        let temp = tempdir().unwrap();
        let release = temp.path().join("ABC-123");
        fs::create_dir_all(release.join("extra")).unwrap();
        fs::write(release.join("ABC-123.mp4"), b"x").unwrap();
        fs::write(release.join("extra/ABC-123-cd2.mp4"), b"x").unwrap();
        let loose = temp.path().join("XYZ-999.mp4");
        fs::write(&loose, b"x").unwrap();

        let expanded = expand_directories(vec![
            (release.clone(), FileEventKind::Moved),
            (release.join("ABC-123.mp4"), FileEventKind::Created),
            (loose.clone(), FileEventKind::Created),
        ]);

        let paths: Vec<&PathBuf> = expanded.keys().collect();
        assert_eq!(
            paths,
            vec![
                &release.join("ABC-123.mp4"),
                &release.join("extra/ABC-123-cd2.mp4"),
                &loose,
            ]
        );
        assert_eq!(expanded[&release.join("ABC-123.mp4")], FileEventKind::Created);
        assert_eq!(expanded[&release.join("extra/ABC-123-cd2.mp4")], FileEventKind::Moved);
    }

    #[tokio::test]
    async fn test_directory_moved_into_root_emits_its_files() {
        let temp = tempdir().unwrap();
        let outside = temp.path().join("outside/ABC-123");
        let root = temp.path().join("root");
        fs::create_dir_all(&outside).unwrap();
        fs::create_dir_all(&root).unwrap();
        fs::write(outside.join("ABC-123.mp4"), b"content").unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let mut manager = WatcherManager::new(Duration::from_millis(200), Duration::from_secs(1));
        let dir = Arc::new(WatchedDirectory::new(&root, None, TransferMode::Link));
        manager.start_watching(dir, tx).unwrap();

        fs::rename(&outside, root.join("ABC-123")).unwrap();

        let found = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if event.path.ends_with("ABC-123/ABC-123.mp4") {
                    return Some(event);
                }
            }
            None
        })
        .await
        .expect("should receive the moved file")
        .expect("channel open");
        assert_eq!(found.path, root.join("ABC-123/ABC-123.mp4"));
    }

    #[tokio::test]
    async fn test_watcher_debounces_into_channel() {
        let temp = tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let mut manager = WatcherManager::new(Duration::from_millis(200), Duration::from_secs(1));
        let dir = Arc::new(WatchedDirectory::new(temp.path(), None, TransferMode::Link));

        manager.start_watching(Arc::clone(&dir), tx).unwrap();
        assert!(manager.is_watching(temp.path()));

        let file = temp.path().join("ABC-123.mp4");
        fs::write(&file, b"content").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("should receive debounced event")
            .expect("channel open");
        assert!(event.path.ends_with("ABC-123.mp4"));

        assert!(manager.stop_watching(temp.path()));
        assert!(!manager.is_watching(temp.path()));
    }

    #[test]
    fn test_missing_directory_fails_to_start() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let mut manager = WatcherManager::new(Duration::from_millis(100), Duration::from_secs(1));
        let dir = Arc::new(WatchedDirectory::new(
            "/definitely/not/here",
            None,
            TransferMode::Link,
        ));

        assert_eq!(manager.start_all(&[dir], &tx), 0);
        assert!(manager.watching().is_empty());
    }
}
