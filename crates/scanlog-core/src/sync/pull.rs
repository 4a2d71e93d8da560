//! Remote store -> History, incremental by watermark.

use serde::Serialize;

use super::{SkipReason, SyncError, SyncOptions};
use crate::auth::AuthSession;
use crate::db::KeyValueStore;
use crate::error::Result;
use crate::remote::{RecordQuery, RemoteRecordStore};
use crate::store::LocalStore;
use crate::util::unix_millis_now;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    /// New History entries from other devices
    pub pulled: usize,
    /// Local entries matched by token and given their server id
    pub reconciled: usize,
    /// Rows returned by the remote query
    pub fetched: usize,
    /// Watermark in effect after the pull
    pub watermark: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PullReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::default()
        }
    }

    pub fn from_error(error: &impl std::fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

pub struct PullEngine<'a, K, R> {
    store: &'a LocalStore<K>,
    remote: &'a R,
    options: &'a SyncOptions,
}

impl<'a, K, R> PullEngine<'a, K, R>
where
    K: KeyValueStore,
    R: RemoteRecordStore,
{
    pub const fn new(store: &'a LocalStore<K>, remote: &'a R, options: &'a SyncOptions) -> Self {
        Self {
            store,
            remote,
            options,
        }
    }

    /// Fetch rows at or after the watermark and merge them into History.
    ///
    /// A failed query leaves History and the watermark untouched.
    pub async fn pull_server(&self, session: Option<&AuthSession>) -> Result<PullReport> {
        let Some(session) = session.filter(|session| session.is_usable()) else {
            tracing::debug!("Skipping pull: no authenticated session");
            return Ok(PullReport::skipped(SkipReason::NoSession));
        };

        let since = self.store.watermark().await?;
        // Taken before the query so rows committed during it are re-fetched
        let started_at = unix_millis_now();
        let query = RecordQuery {
            since,
            owner: session.user.id.clone(),
        };

        let rows = match self.remote.query(session, &query).await {
            Ok(rows) => rows,
            Err(error) => {
                let error = SyncError::PullError(error);
                tracing::warn!("{error}");
                return Ok(PullReport {
                    watermark: since,
                    error: Some(error.to_string()),
                    ..PullReport::skipped(SkipReason::PullError)
                });
            }
        };

        let fetched = rows.len();
        let merged = self.store.merge_pulled(rows).await?;
        let watermark = self
            .store
            .advance_watermark(started_at.saturating_sub(self.options.pull_overlap_millis()))
            .await?;

        tracing::info!(
            "Pull finished: {fetched} fetched, {} new, {} reconciled",
            merged.inserted,
            merged.reconciled
        );
        Ok(PullReport {
            pulled: merged.inserted,
            reconciled: merged.reconciled,
            fetched,
            watermark,
            ..PullReport::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryKeyValueStore;
    use crate::models::{Record, RecordKind};
    use crate::remote::{MemoryRemoteStore, RemoteError, RemoteRecord};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn session() -> AuthSession {
        AuthSession::new("token", "u1")
    }

    fn remote_row(token: &str, created_at: i64) -> RemoteRecord {
        RemoteRecord {
            server_id: String::new(),
            idempotency_token: Some(token.to_string()),
            user_id: Some("u1".to_string()),
            tenant_id: Some("t1".to_string()),
            created_at,
            kind: RecordKind::Scan,
            payload: format!("payload {token}"),
            metadata: None,
        }
    }

    fn no_overlap() -> SyncOptions {
        SyncOptions::default().with_pull_overlap(Duration::ZERO)
    }

    #[tokio::test]
    async fn merges_new_rows_and_moves_watermark_to_now() {
        let store = LocalStore::new(MemoryKeyValueStore::new());
        let remote = MemoryRemoteStore::new();
        let now = unix_millis_now();
        let server_id = remote.seed(remote_row("other-device", now - 1_000)).await;
        let options = no_overlap();

        let before = unix_millis_now();
        let report = PullEngine::new(&store, &remote, &options)
            .pull_server(Some(&session()))
            .await
            .unwrap();
        let after = unix_millis_now();

        assert_eq!(report.pulled, 1);
        assert_eq!(report.fetched, 1);
        assert!(report.watermark >= before && report.watermark <= after);
        assert_eq!(store.watermark().await.unwrap(), report.watermark);

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].local_id, format!("remote-{server_id}"));
        assert!(history[0].synced);
    }

    #[tokio::test]
    async fn overlap_keeps_watermark_behind_now() {
        let store = LocalStore::new(MemoryKeyValueStore::new());
        let remote = MemoryRemoteStore::new();
        let options = SyncOptions::default();

        let before = unix_millis_now();
        let report = PullEngine::new(&store, &remote, &options)
            .pull_server(Some(&session()))
            .await
            .unwrap();

        assert!(report.watermark <= before);
        assert!(report.watermark >= before - 120_000 - 1_000);
    }

    #[tokio::test]
    async fn repeated_pulls_do_not_duplicate_history() {
        let store = LocalStore::new(MemoryKeyValueStore::new());
        let remote = MemoryRemoteStore::new();
        remote.seed(remote_row("a", unix_millis_now() - 10)).await;
        let options = SyncOptions::default();
        let engine = PullEngine::new(&store, &remote, &options);

        engine.pull_server(Some(&session())).await.unwrap();
        let second = engine.pull_server(Some(&session())).await.unwrap();

        // The overlap window re-fetches the row; the merge drops it
        assert_eq!(second.fetched, 1);
        assert_eq!(second.pulled, 0);
        assert_eq!(store.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reconciles_local_entry_pushed_without_confirmation() {
        let store = LocalStore::new(MemoryKeyValueStore::new());
        let remote = MemoryRemoteStore::new();
        let record = Record::new_local(RecordKind::Scan, "X");
        store.append_local(record.clone()).await.unwrap();
        remote
            .seed(remote_row(&record.idempotency_token, record.created_at))
            .await;
        let options = SyncOptions::default();

        let report = PullEngine::new(&store, &remote, &options)
            .pull_server(Some(&session()))
            .await
            .unwrap();

        assert_eq!(report.pulled, 0);
        assert_eq!(report.reconciled, 1);
        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].local_id, record.local_id);
        assert!(history[0].server_id.is_some());
    }

    #[tokio::test]
    async fn query_failure_leaves_state_unchanged() {
        let store = LocalStore::new(MemoryKeyValueStore::new());
        store.advance_watermark(5_000).await.unwrap();
        let remote = MemoryRemoteStore::new();
        remote.seed(remote_row("a", 6_000)).await;
        remote
            .set_query_failure(Some(RemoteError::transport("connection reset")))
            .await;
        let options = SyncOptions::default();

        let report = PullEngine::new(&store, &remote, &options)
            .pull_server(Some(&session()))
            .await
            .unwrap();

        assert_eq!(report.reason, Some(SkipReason::PullError));
        assert!(report.error.unwrap().contains("connection reset"));
        assert_eq!(report.watermark, 5_000);
        assert_eq!(store.watermark().await.unwrap(), 5_000);
        assert!(store.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rows_before_watermark_are_not_fetched() {
        let store = LocalStore::new(MemoryKeyValueStore::new());
        let now = unix_millis_now();
        store.advance_watermark(now - 1_000).await.unwrap();
        let remote = MemoryRemoteStore::new();
        remote.seed(remote_row("old", now - 60_000)).await;
        remote.seed(remote_row("new", now - 500)).await;
        let options = SyncOptions::default();

        let report = PullEngine::new(&store, &remote, &options)
            .pull_server(Some(&session()))
            .await
            .unwrap();

        assert_eq!(report.fetched, 1);
        assert_eq!(store.history().await.unwrap()[0].payload, "payload new");
        // Overlap never moves an existing watermark backwards
        assert_eq!(report.watermark, now - 1_000);
    }

    #[tokio::test]
    async fn row_at_the_watermark_is_included_and_merged_once() {
        let store = LocalStore::new(MemoryKeyValueStore::new());
        // Ahead of the clock so the pull leaves the watermark where it is
        let t0 = unix_millis_now() + 3_600_000;
        store.advance_watermark(t0).await.unwrap();
        let remote = MemoryRemoteStore::new();
        remote.seed(remote_row("at", t0)).await;
        remote.seed(remote_row("after", t0 + 1)).await;
        remote.seed(remote_row("before", t0 - 1)).await;
        let options = no_overlap();
        let engine = PullEngine::new(&store, &remote, &options);

        let first = engine.pull_server(Some(&session())).await.unwrap();
        assert_eq!(first.fetched, 2);
        assert_eq!(first.pulled, 2);
        assert_eq!(first.watermark, t0);

        let second = engine.pull_server(Some(&session())).await.unwrap();
        assert_eq!(second.fetched, 2);
        assert_eq!(second.pulled, 0);

        let history = store.history().await.unwrap();
        let payloads = history
            .iter()
            .map(|record| record.payload.as_str())
            .collect::<Vec<_>>();
        assert_eq!(payloads, vec!["payload after", "payload at"]);
    }

    #[tokio::test]
    async fn without_session_nothing_is_queried() {
        let store = LocalStore::new(MemoryKeyValueStore::new());
        let remote = MemoryRemoteStore::new();
        remote
            .set_query_failure(Some(RemoteError::transport("should not be called")))
            .await;
        let options = SyncOptions::default();

        let report = PullEngine::new(&store, &remote, &options)
            .pull_server(None)
            .await
            .unwrap();

        assert_eq!(report.reason, Some(SkipReason::NoSession));
        assert_eq!(report.error, None);
        assert_eq!(store.watermark().await.unwrap(), 0);
    }
}
