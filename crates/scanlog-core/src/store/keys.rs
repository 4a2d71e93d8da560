//! Persisted key names.

/// Merged record view, JSON array, newest first.
pub const HISTORY: &str = "scanlog.history.v2";
/// Unconfirmed local records, JSON array, oldest first.
pub const OUTBOX: &str = "scanlog.outbox.v2";
/// Inclusive lower bound for the next pull (Unix ms).
pub const PULL_WATERMARK: &str = "scanlog.pull_watermark";
/// Set once the legacy keys below have been removed.
pub const LEGACY_CLEANED: &str = "scanlog.legacy_cleaned";

/// Keys written by the previous sync scheme.
pub const LEGACY_KEYS: &[&str] = &[
    "scanlog.sync_queue",
    "scanlog.history",
    "scanlog.last_sync",
    "scanlog.pending_uploads",
    "scanlog.device_cursor",
];
