use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{OverwritePolicy, RemoteConfig, TransferMode};
use crate::error_codes::{
    ERR_BETTER_QUALITY_EXISTS, ERR_INVALID_DESTINATION, ERR_OVERWRITE_DISABLED,
    ERR_SOURCE_MISSING, ERR_TARGET_MISSING, ERR_TRANSFER_FAILED,
};
use crate::path_validation::join_within_root;
use crate::transfer::naming::{sanitize_component, NamingContext};
use crate::transfer::ops::{operation_for, FileOperation};
use crate::transfer::types::{
    OverwriteDecision, TransferPlan, TransferRequest, TransferResult, TransferShape,
};

/// Serializes every filesystem mutation in the process.
static FS_LOCK: Mutex<()> = Mutex::new(());

const BLURAY_MARKER: &str = "BDMV";

/// Runs `f` on the blocking pool while holding the filesystem lock.
pub(crate) async fn with_fs_lock<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let _guard = FS_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    })
    .await
    .map_err(io::Error::other)?
}

/// Same existence test for files and dangling links.
fn occupied(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

pub struct TransferEngine {
    policy: OverwritePolicy,
    remote: RemoteConfig,
    overrides: HashMap<TransferMode, Arc<dyn FileOperation>>,
}

impl TransferEngine {
    pub fn new(policy: OverwritePolicy, remote: RemoteConfig) -> Self {
        Self {
            policy,
            remote,
            overrides: HashMap::new(),
        }
    }

    /// Replaces the physical operation used for `mode`.
    pub fn with_operation(mut self, mode: TransferMode, op: Arc<dyn FileOperation>) -> Self {
        self.overrides.insert(mode, op);
        self
    }

    /// The physical operation in effect for `mode`, overrides included.
    pub fn operation(&self, mode: TransferMode) -> Arc<dyn FileOperation> {
        self.overrides
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| operation_for(mode, &self.remote))
    }

    /// Resolves the destination and the overwrite decision without touching files.
    pub fn plan(&self, req: &TransferRequest<'_>) -> TransferPlan {
        if !req.source.exists() {
            return TransferPlan::rejected(
                req.source,
                req.mode,
                ERR_SOURCE_MISSING,
                format!("source missing: {}", req.source.display()),
            );
        }
        if !req.mode.is_remote() && !req.target_root.exists() {
            return TransferPlan::rejected(
                req.source,
                req.mode,
                ERR_TARGET_MISSING,
                format!("target missing: {}", req.target_root.display()),
            );
        }

        let is_dir = req.source.is_dir();
        let file_ext = if is_dir {
            String::new()
        } else {
            req.source
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default()
        };

        let code = req
            .meta
            .code()
            .map(str::to_string)
            .unwrap_or_else(|| req.record.code.clone());
        let nesting = PathBuf::from(sanitize_component(req.record.primary_actor()))
            .join(sanitize_component(&code));
        let rendered = NamingContext::new(req.meta, req.record, &file_ext).render(req.template);

        let destination = match join_within_root(req.target_root, &nesting)
            .and_then(|root| join_within_root(&root, Path::new(&rendered)))
        {
            Ok(path) => path,
            Err(e) => {
                return TransferPlan::rejected(req.source, req.mode, ERR_INVALID_DESTINATION, e)
            }
        };

        if is_dir {
            let parent = destination
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or(destination);
            return TransferPlan {
                source: req.source.to_path_buf(),
                destination: parent,
                mode: req.mode,
                shape: TransferShape::Directory,
                decision: OverwriteDecision::Create,
            };
        }

        let decision = if occupied(&destination) {
            self.overwrite_decision(req.source, &destination)
        } else {
            OverwriteDecision::Create
        };

        TransferPlan {
            source: req.source.to_path_buf(),
            destination,
            mode: req.mode,
            shape: TransferShape::File,
            decision,
        }
    }

    fn overwrite_decision(&self, source: &Path, destination: &Path) -> OverwriteDecision {
        match self.policy {
            OverwritePolicy::Always => OverwriteDecision::Replace,
            OverwritePolicy::Size => {
                let existing = std::fs::metadata(destination).map(|m| m.len()).unwrap_or(0);
                let incoming = std::fs::metadata(source).map(|m| m.len()).unwrap_or(0);
                if existing < incoming {
                    OverwriteDecision::Replace
                } else {
                    OverwriteDecision::Reject {
                        code: ERR_BETTER_QUALITY_EXISTS.to_string(),
                        message: format!(
                            "better quality already present: {} ({existing} >= {incoming} bytes)",
                            destination.display()
                        ),
                    }
                }
            }
            OverwritePolicy::Never => OverwriteDecision::Reject {
                code: ERR_OVERWRITE_DISABLED.to_string(),
                message: format!(
                    "already present, overwrite disabled: {}",
                    destination.display()
                ),
            },
        }
    }

    pub async fn transfer(&self, req: &TransferRequest<'_>) -> TransferResult {
        let plan = self.plan(req);
        if let OverwriteDecision::Reject { code, message } = &plan.decision {
            return TransferResult::failure(req.source, code, message.clone());
        }

        let op = self.operation(req.mode);
        match plan.shape {
            TransferShape::Directory => self.transfer_dir(&plan, op).await,
            TransferShape::File => self.transfer_file(&plan, op).await,
        }
    }

    async fn transfer_file(&self, plan: &TransferPlan, op: Arc<dyn FileOperation>) -> TransferResult {
        let source = plan.source.clone();
        let target = plan.destination.clone();
        let replace = plan.decision == OverwriteDecision::Replace;
        let remote = plan.mode.is_remote();
        let size = tokio::fs::metadata(&source).await.map(|m| m.len()).unwrap_or(0);

        let outcome = with_fs_lock({
            let source = source.clone();
            let target = target.clone();
            move || {
                if replace && !remote {
                    std::fs::remove_file(&target)?;
                }
                if !remote {
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                op.apply(&source, &target)
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                info!(
                    source = %source.display(),
                    target = %target.display(),
                    mode = %plan.mode,
                    replaced = replace,
                    "file transferred"
                );
                TransferResult {
                    success: true,
                    message: format!("{} transferred", source.display()),
                    source: source.clone(),
                    target_path: Some(target.clone()),
                    total_size: size,
                    file_count: 1,
                    is_bluray: false,
                    file_list: vec![source],
                    file_list_new: vec![target],
                    error_code: None,
                }
            }
            Err(e) => TransferResult::failure(
                &source,
                ERR_TRANSFER_FAILED,
                format!("{} failed for {}: {e}", plan.mode, source.display()),
            ),
        }
    }

    /// Mirrors a directory under one destination parent. Existing files are
    /// skipped; the first failure aborts without undoing earlier files.
    async fn transfer_dir(&self, plan: &TransferPlan, op: Arc<dyn FileOperation>) -> TransferResult {
        let source = plan.source.clone();
        let parent = plan.destination.clone();
        let remote = plan.mode.is_remote();
        let is_bluray = source.join(BLURAY_MARKER).is_dir();

        let files: Vec<PathBuf> = WalkDir::new(&source)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();

        let mut result = TransferResult {
            success: true,
            source: source.clone(),
            target_path: Some(parent.clone()),
            is_bluray,
            ..Default::default()
        };

        for file in files {
            let Ok(relative) = file.strip_prefix(&source).map(Path::to_path_buf) else {
                continue;
            };
            let target = parent.join(&relative);
            if occupied(&target) {
                debug!(target = %target.display(), "destination exists, skipping");
                continue;
            }

            let size = tokio::fs::metadata(&file).await.map(|m| m.len()).unwrap_or(0);
            let op = Arc::clone(&op);
            let outcome = with_fs_lock({
                let file = file.clone();
                let target = target.clone();
                move || {
                    if !remote {
                        if let Some(dir) = target.parent() {
                            std::fs::create_dir_all(dir)?;
                        }
                    }
                    op.apply(&file, &target)
                }
            })
            .await;

            if let Err(e) = outcome {
                warn!(file = %file.display(), "directory transfer aborted: {e}");
                result.success = false;
                result.error_code = Some(ERR_TRANSFER_FAILED.to_string());
                result.message = format!("{} failed for {}: {e}", plan.mode, file.display());
                return result;
            }

            result.total_size += size;
            result.file_count += 1;
            result.file_list.push(file);
            result.file_list_new.push(target);
        }

        info!(
            source = %source.display(),
            target = %parent.display(),
            files = result.file_count,
            bluray = is_bluray,
            "directory transferred"
        );
        result.message = format!("{} files transferred", result.file_count);
        result
    }

    /// After a move, deletes emptied directories from `start` upward, never
    /// touching `watch_root`. A level that still holds media stops the walk.
    pub async fn cleanup_after_move(
        &self,
        start: &Path,
        watch_root: &Path,
        media_extensions: &[String],
    ) -> Vec<PathBuf> {
        let start = start.to_path_buf();
        let root = watch_root.to_path_buf();
        let extensions = media_extensions.to_vec();
        with_fs_lock(move || Ok(super::cleanup::remove_empty_ancestors(&start, &root, &extensions)))
            .await
            .unwrap_or_default()
    }
}
