//! Physical file operations behind one interface.
//!
//! All implementations are blocking; the engine runs them on the blocking pool
//! while holding the filesystem lock.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use crate::config::{RemoteConfig, TransferMode};

pub trait FileOperation: Send + Sync {
    fn name(&self) -> &'static str;

    /// Relocates `source` to `target`. The parent of `target` already exists
    /// for local operations.
    fn apply(&self, source: &Path, target: &Path) -> io::Result<()>;
}

pub struct MoveOperation;

impl FileOperation for MoveOperation {
    fn name(&self) -> &'static str {
        "move"
    }

    fn apply(&self, source: &Path, target: &Path) -> io::Result<()> {
        match fs::rename(source, target) {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                copy_preserving_mtime(source, target)?;
                fs::remove_file(source)
            }
            Err(e) => Err(e),
        }
    }
}

/// `EXDEV` on unix, `ERROR_NOT_SAME_DEVICE` on windows.
const CROSS_DEVICE_ERRNO: i32 = if cfg!(windows) { 17 } else { 18 };

fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(CROSS_DEVICE_ERRNO)
}

pub struct CopyOperation;

impl FileOperation for CopyOperation {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn apply(&self, source: &Path, target: &Path) -> io::Result<()> {
        copy_preserving_mtime(source, target)
    }
}

pub struct HardLinkOperation;

impl FileOperation for HardLinkOperation {
    fn name(&self) -> &'static str {
        "link"
    }

    fn apply(&self, source: &Path, target: &Path) -> io::Result<()> {
        fs::hard_link(source, target)
    }
}

pub struct SoftLinkOperation;

impl FileOperation for SoftLinkOperation {
    fn name(&self) -> &'static str {
        "softlink"
    }

    #[cfg(unix)]
    fn apply(&self, source: &Path, target: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(source, target)
    }

    #[cfg(windows)]
    fn apply(&self, source: &Path, target: &Path) -> io::Result<()> {
        std::os::windows::fs::symlink_file(source, target)
    }
}

/// Shells out to an rclone-compatible binary: `<binary> copyto|moveto <src> <prefix><dest>`.
pub struct RemoteOperation {
    binary: String,
    prefix: String,
    remove_source: bool,
}

impl RemoteOperation {
    pub fn new(config: &RemoteConfig, remove_source: bool) -> Self {
        Self {
            binary: config.binary.clone(),
            prefix: config.prefix.clone(),
            remove_source,
        }
    }

    fn subcommand(&self) -> &'static str {
        if self.remove_source {
            "moveto"
        } else {
            "copyto"
        }
    }
}

impl FileOperation for RemoteOperation {
    fn name(&self) -> &'static str {
        if self.remove_source {
            "remote_move"
        } else {
            "remote_copy"
        }
    }

    fn apply(&self, source: &Path, target: &Path) -> io::Result<()> {
        let destination = format!("{}{}", self.prefix, target.display());
        let output = Command::new(&self.binary)
            .arg(self.subcommand())
            .arg(source)
            .arg(&destination)
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "{} {} exited with {}: {}",
                self.binary,
                self.subcommand(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// The built-in operation for a mode.
pub fn operation_for(mode: TransferMode, remote: &RemoteConfig) -> Arc<dyn FileOperation> {
    match mode {
        TransferMode::Move => Arc::new(MoveOperation),
        TransferMode::Copy => Arc::new(CopyOperation),
        TransferMode::Link => Arc::new(HardLinkOperation),
        TransferMode::Softlink => Arc::new(SoftLinkOperation),
        TransferMode::RemoteCopy => Arc::new(RemoteOperation::new(remote, false)),
        TransferMode::RemoteMove => Arc::new(RemoteOperation::new(remote, true)),
    }
}

fn copy_preserving_mtime(source: &Path, target: &Path) -> io::Result<()> {
    fs::copy(source, target)?;
    let modified = fs::metadata(source)?.modified()?;
    filetime::set_file_mtime(target, filetime::FileTime::from_system_time(modified))
}
