//! Events that start a sync pass.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

use super::{SyncEngine, SyncOutcome};
use crate::auth::SessionProvider;
use crate::db::KeyValueStore;
use crate::remote::{MembershipResolver, RemoteRecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncTrigger {
    /// Reachability went from disconnected to connected
    NetworkReconnected,
    /// The app returned to the foreground
    Foreground,
    /// Explicit user request or timer
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NetworkReconnected => "network reconnected",
            Self::Foreground => "foreground",
            Self::Manual => "manual",
        };
        formatter.write_str(label)
    }
}

/// Turns reachability samples into reconnect triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityTracker {
    online: bool,
}

impl ConnectivityTracker {
    pub const fn new(online: bool) -> Self {
        Self { online }
    }

    pub const fn is_online(&self) -> bool {
        self.online
    }

    /// Record a sample; yields a trigger only on a disconnected -> connected edge.
    pub fn observe(&mut self, online: bool) -> Option<SyncTrigger> {
        let reconnected = online && !self.online;
        self.online = online;
        reconnected.then_some(SyncTrigger::NetworkReconnected)
    }
}

/// Run a sync pass per trigger until every sender is dropped.
///
/// Triggers that arrive while a pass runs are coalesced into one follow-up
/// pass. `on_pass` sees the trigger that started each pass. Returns the
/// number of passes run.
pub async fn run_trigger_loop<K, R, M, S, F>(
    engine: &SyncEngine<K, R, M, S>,
    mut triggers: mpsc::Receiver<SyncTrigger>,
    mut on_pass: F,
) -> usize
where
    K: KeyValueStore,
    R: RemoteRecordStore,
    M: MembershipResolver,
    S: SessionProvider,
    F: FnMut(SyncTrigger, &SyncOutcome),
{
    let mut passes = 0;
    while let Some(trigger) = triggers.recv().await {
        let mut coalesced = 0_usize;
        while triggers.try_recv().is_ok() {
            coalesced += 1;
        }
        if coalesced > 0 {
            tracing::debug!("Coalesced {coalesced} pending sync triggers");
        }

        tracing::debug!("Sync triggered: {trigger}");
        let outcome = engine.sync_all().await;
        passes += 1;
        on_pass(trigger, &outcome);
    }
    passes
}
