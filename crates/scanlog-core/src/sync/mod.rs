//! Outbox/pull reconciliation engine.
//!
//! A sync pass runs three stages strictly in order: the legacy migrator, the
//! push engine (Outbox -> remote) and the pull engine (remote -> History).
//! [`SyncEngine::sync_all`] contains every stage failure in its result, so
//! trigger sources never have to handle errors.

mod migrator;
mod orchestrator;
mod pull;
mod push;
mod triggers;

pub use migrator::{MigrationReport, Migrator};
pub use orchestrator::{SyncEngine, SyncOutcome};
pub use pull::{PullEngine, PullReport};
pub use push::{PushEngine, PushFailure, PushReport};
pub use triggers::{run_trigger_loop, ConnectivityTracker, SyncTrigger};

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::remote::RemoteError;

const DEFAULT_PULL_OVERLAP: Duration = Duration::from_secs(120);

/// Why a stage did not run or did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// No usable authenticated session
    NoSession,
    /// The remote query failed; the watermark was left unchanged
    PullError,
}

/// Per-stage failures of the sync engine.
///
/// A duplicate-key response on push is not part of it: the record already
/// exists remotely, so it is handled as a success. A missing session is not
/// a failure either; the stage is skipped with [`SkipReason::NoSession`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Membership lookup found no tenant; the record stays queued
    #[error("no tenant membership found for user {0}")]
    TenantUnresolved(String),
    /// Network failure; state is unchanged and the next pass retries
    #[error("transport error: {0}")]
    Transport(RemoteError),
    /// The remote store refused the row (validation, authorization)
    #[error("rejected by remote store: {0}")]
    Rejected(RemoteError),
    /// The incremental query failed
    #[error("pull failed: {0}")]
    PullError(RemoteError),
    /// Local persistence failed
    #[error(transparent)]
    Storage(#[from] crate::Error),
}

impl SyncError {
    /// Classify a remote failure that is not a duplicate key.
    pub fn from_remote(error: RemoteError) -> Self {
        if error.is_transport() {
            Self::Transport(error)
        } else {
            Self::Rejected(error)
        }
    }
}

/// Tuning for a sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// How far behind "now" the pull watermark is placed after a pull.
    ///
    /// Rows whose server timestamp lands slightly in the past (clock skew,
    /// slow commits) are re-fetched on the next pull instead of skipped; the
    /// merge drops the re-fetched rows it already has.
    pub pull_overlap: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            pull_overlap: DEFAULT_PULL_OVERLAP,
        }
    }
}

impl SyncOptions {
    #[must_use]
    pub const fn with_pull_overlap(mut self, pull_overlap: Duration) -> Self {
        self.pull_overlap = pull_overlap;
        self
    }

    pub fn pull_overlap_millis(&self) -> i64 {
        i64::try_from(self.pull_overlap.as_millis()).unwrap_or(i64::MAX)
    }
}
