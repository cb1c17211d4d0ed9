//! Error code constants
//!
//! Failed `TransferResult`s and watcher warnings carry one of these codes so
//! history entries and notifications stay machine-readable.

/// Watch start failed
pub const ERR_WATCH_START_FAILED: &str = "ERR_WATCH_START_FAILED";

/// Watch stop failed
pub const ERR_WATCH_STOP_FAILED: &str = "ERR_WATCH_STOP_FAILED";

/// Source path vanished before the transfer ran
pub const ERR_SOURCE_MISSING: &str = "ERR_SOURCE_MISSING";

/// Local target root does not exist
pub const ERR_TARGET_MISSING: &str = "ERR_TARGET_MISSING";

/// Destination exists and is at least as large as the source
pub const ERR_BETTER_QUALITY_EXISTS: &str = "ERR_BETTER_QUALITY_EXISTS";

/// Destination exists and the overwrite policy is `never`
pub const ERR_OVERWRITE_DISABLED: &str = "ERR_OVERWRITE_DISABLED";

/// Rendered destination escapes the target root
pub const ERR_INVALID_DESTINATION: &str = "ERR_INVALID_DESTINATION";

/// The physical file operation failed
pub const ERR_TRANSFER_FAILED: &str = "ERR_TRANSFER_FAILED";

/// Whether a code describes a naming conflict rather than an I/O failure.
pub fn is_conflict(code: &str) -> bool {
    code == ERR_BETTER_QUALITY_EXISTS || code == ERR_OVERWRITE_DISABLED
}
