//! Single entry point for a full sync pass.

use serde::Serialize;
use tokio::sync::{watch, Mutex};

use super::{
    MigrationReport, Migrator, PullEngine, PullReport, PushEngine, PushReport, SkipReason,
    SyncOptions,
};
use crate::auth::{AuthSession, SessionProvider};
use crate::db::KeyValueStore;
use crate::error::Result;
use crate::remote::{MembershipResolver, RemoteRecordStore};
use crate::state::SyncState;
use crate::store::LocalStore;

/// Per-stage results of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub migration: MigrationReport,
    pub push: PushReport,
    pub pull: PullReport,
}

impl SyncOutcome {
    /// Whether push or pull failed or any record stayed queued because of an error.
    ///
    /// Legacy cleanup is best-effort: its failure is reported in `migration`
    /// and retried next pass, but does not count here.
    pub fn has_errors(&self) -> bool {
        self.push.error.is_some()
            || self.push.failed > 0
            || self.pull.error.is_some()
    }

    pub fn state(&self) -> SyncState {
        if self.push.reason == Some(SkipReason::NoSession) {
            SyncState::Offline
        } else if self.has_errors() {
            SyncState::Error
        } else {
            SyncState::Synced
        }
    }
}

/// Runs migrator, push and pull in order, one pass at a time.
pub struct SyncEngine<K, R, M, S> {
    store: LocalStore<K>,
    remote: R,
    members: M,
    sessions: S,
    options: SyncOptions,
    in_flight: Mutex<()>,
    state: watch::Sender<SyncState>,
}

impl<K, R, M, S> SyncEngine<K, R, M, S>
where
    K: KeyValueStore,
    R: RemoteRecordStore,
    M: MembershipResolver,
    S: SessionProvider,
{
    pub fn new(store: LocalStore<K>, remote: R, members: M, sessions: S) -> Self {
        let (state, _) = watch::channel(SyncState::Offline);
        Self {
            store,
            remote,
            members,
            sessions,
            options: SyncOptions::default(),
            in_flight: Mutex::new(()),
            state,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub const fn store(&self) -> &LocalStore<K> {
        &self.store
    }

    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// State after the most recent pass, or `Syncing` while one runs.
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub async fn migrate_once(&self) -> Result<MigrationReport> {
        Migrator::new(&self.store).migrate_once().await
    }

    pub async fn push_outbox(&self) -> Result<PushReport> {
        let session = self.sessions.current_session().await;
        self.push_with(session.as_ref()).await
    }

    pub async fn pull_server(&self) -> Result<PullReport> {
        let session = self.sessions.current_session().await;
        self.pull_with(session.as_ref()).await
    }

    /// Run a full pass, waiting for any pass already in flight to finish.
    ///
    /// Never fails: stage errors are recorded in the returned outcome.
    pub async fn sync_all(&self) -> SyncOutcome {
        let _guard = self.in_flight.lock().await;
        self.run_pass().await
    }

    /// Run a full pass unless one is already in flight.
    pub async fn try_sync_all(&self) -> Option<SyncOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("Sync already in progress; skipping");
            return None;
        };
        Some(self.run_pass().await)
    }

    async fn run_pass(&self) -> SyncOutcome {
        self.state.send_replace(SyncState::Syncing);

        let migration = self
            .migrate_once()
            .await
            .unwrap_or_else(|error| MigrationReport::from_error(&error));

        let session = self.sessions.current_session().await;
        let push = self
            .push_with(session.as_ref())
            .await
            .unwrap_or_else(|error| {
                tracing::error!("Push stage failed: {error}");
                PushReport::from_error(&error)
            });
        let pull = self
            .pull_with(session.as_ref())
            .await
            .unwrap_or_else(|error| {
                tracing::error!("Pull stage failed: {error}");
                PullReport::from_error(&error)
            });

        let outcome = SyncOutcome {
            migration,
            push,
            pull,
        };
        let state = outcome.state();
        self.state.send_replace(state);
        tracing::debug!("Sync pass finished in state {state:?}");
        outcome
    }

    async fn push_with(&self, session: Option<&AuthSession>) -> Result<PushReport> {
        PushEngine::new(&self.store, &self.remote, &self.members)
            .push_outbox(session)
            .await
    }

    async fn pull_with(&self, session: Option<&AuthSession>) -> Result<PullReport> {
        PullEngine::new(&self.store, &self.remote, &self.options)
            .pull_server(session)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticSessionProvider;
    use crate::db::MemoryKeyValueStore;
    use crate::models::{Record, RecordKind};
    use crate::remote::{
        InsertedRecord, MemoryRemoteStore, RecordQuery, RemoteError, RemoteInsert, RemoteRecord,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio::sync::Notify;

    type MemoryEngine = SyncEngine<
        MemoryKeyValueStore,
        MemoryRemoteStore,
        MemoryRemoteStore,
        StaticSessionProvider,
    >;

    fn session() -> AuthSession {
        AuthSession::new("token", "u1")
    }

    async fn engine_with(session: Option<AuthSession>) -> (MemoryEngine, MemoryRemoteStore) {
        let remote = MemoryRemoteStore::new();
        remote.add_membership("u1", "t1").await;
        let engine = SyncEngine::new(
            LocalStore::new(MemoryKeyValueStore::new()),
            remote.clone(),
            remote.clone(),
            StaticSessionProvider::new(session),
        );
        (engine, remote)
    }

    /// Remote store whose inserts pause until released.
    #[derive(Clone, Default)]
    struct GatedRemote {
        inner: MemoryRemoteStore,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl RemoteRecordStore for GatedRemote {
        async fn insert(
            &self,
            session: &AuthSession,
            record: &RemoteInsert,
        ) -> std::result::Result<InsertedRecord, RemoteError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.insert(session, record).await
        }

        async fn query(
            &self,
            session: &AuthSession,
            query: &RecordQuery,
        ) -> std::result::Result<Vec<RemoteRecord>, RemoteError> {
            self.inner.query(session, query).await
        }
    }

    #[tokio::test]
    async fn offline_scenario_then_sign_in() {
        let (engine, remote) = engine_with(None).await;
        let record = Record::new_local(RecordKind::Scan, "X");
        engine.store().append_local(record.clone()).await.unwrap();

        let outcome = engine.sync_all().await;
        assert_eq!(outcome.push.reason, Some(SkipReason::NoSession));
        assert_eq!(outcome.pull.reason, Some(SkipReason::NoSession));
        assert_eq!(engine.state(), SyncState::Offline);
        assert_eq!(engine.store().outbox().await.unwrap().len(), 1);
        assert!(!engine.store().history().await.unwrap()[0].synced);

        engine.sessions.replace(Some(session())).await;
        let outcome = engine.sync_all().await;
        assert_eq!(outcome.push.pushed, 1);
        assert_eq!(engine.state(), SyncState::Synced);
        assert!(engine.store().outbox().await.unwrap().is_empty());

        let history = engine.store().history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].synced);
        assert_eq!(remote.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn two_devices_see_each_others_records() {
        let remote = MemoryRemoteStore::new();
        remote.add_membership("u1", "t1").await;
        let device = |remote: &MemoryRemoteStore| {
            SyncEngine::new(
                LocalStore::new(MemoryKeyValueStore::new()),
                remote.clone(),
                remote.clone(),
                StaticSessionProvider::new(Some(session())),
            )
        };
        let phone = device(&remote);
        let laptop = device(&remote);

        phone
            .store()
            .append_local(Record::new_local(RecordKind::Scan, "from phone"))
            .await
            .unwrap();
        phone.sync_all().await;

        let outcome = laptop.sync_all().await;
        assert_eq!(outcome.pull.pulled, 1);
        let history = laptop.store().history().await.unwrap();
        assert_eq!(history[0].payload, "from phone");
        assert!(history[0].is_remote_origin());

        // The phone's own row comes back reconciled, not duplicated
        let outcome = phone.sync_all().await;
        assert_eq!(outcome.pull.pulled, 0);
        assert_eq!(phone.store().history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_retried_next_pass() {
        let (engine, remote) = engine_with(Some(session())).await;
        let record = Record::new_local(RecordKind::Generate, "WIFI:S:home;;");
        remote.fail_inserts_for(&record.idempotency_token).await;
        engine.store().append_local(record).await.unwrap();

        let outcome = engine.sync_all().await;
        assert_eq!(outcome.push.failed, 1);
        assert!(outcome.has_errors());
        assert_eq!(engine.state(), SyncState::Error);
        assert_eq!(engine.store().outbox().await.unwrap().len(), 1);

        remote.clear_failures().await;
        let outcome = engine.sync_all().await;
        assert_eq!(outcome.push.pushed, 1);
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(remote.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn pull_failure_does_not_undo_push() {
        let (engine, remote) = engine_with(Some(session())).await;
        engine
            .store()
            .append_local(Record::new_local(RecordKind::Scan, "X"))
            .await
            .unwrap();
        remote
            .set_query_failure(Some(RemoteError::new("http_503", "unavailable")))
            .await;

        let outcome = engine.sync_all().await;
        assert_eq!(outcome.push.pushed, 1);
        assert_eq!(outcome.pull.reason, Some(SkipReason::PullError));
        assert_eq!(engine.state(), SyncState::Error);
        assert!(engine.store().outbox().await.unwrap().is_empty());
        assert_eq!(engine.store().watermark().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn first_pass_runs_legacy_cleanup_once() {
        let (engine, _remote) = engine_with(None).await;
        engine
            .store()
            .kv()
            .set("scanlog.pending_uploads", "[]")
            .await
            .unwrap();

        let first = engine.sync_all().await;
        let second = engine.sync_all().await;

        assert_eq!(first.migration.deleted, 1);
        assert!(second.migration.already_done);
        assert!(engine.store().legacy_cleaned().await.unwrap());
    }

    #[tokio::test]
    async fn try_sync_all_skips_while_a_pass_is_in_flight() {
        let gated = GatedRemote::default();
        gated.inner.add_membership("u1", "t1").await;
        let engine = SyncEngine::new(
            LocalStore::new(MemoryKeyValueStore::new()),
            gated.clone(),
            gated.inner.clone(),
            StaticSessionProvider::new(Some(session())),
        );
        engine
            .store()
            .append_local(Record::new_local(RecordKind::Scan, "X"))
            .await
            .unwrap();

        let (first, second) = tokio::join!(engine.sync_all(), async {
            gated.entered.notified().await;
            assert_eq!(engine.state(), SyncState::Syncing);
            let skipped = engine.try_sync_all().await;
            gated.release.notify_one();
            skipped
        });

        assert_eq!(first.push.pushed, 1);
        assert_eq!(second, None);
        assert_eq!(gated.inner.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn append_during_push_is_not_lost() {
        let gated = GatedRemote::default();
        gated.inner.add_membership("u1", "t1").await;
        let engine = SyncEngine::new(
            LocalStore::new(MemoryKeyValueStore::new()),
            gated.clone(),
            gated.inner.clone(),
            StaticSessionProvider::new(Some(session())),
        );
        engine
            .store()
            .append_local(Record::new_local(RecordKind::Scan, "first"))
            .await
            .unwrap();
        let late = Record::new_local(RecordKind::Scan, "late");

        let (outcome, ()) = tokio::join!(engine.sync_all(), async {
            gated.entered.notified().await;
            engine.store().append_local(late.clone()).await.unwrap();
            gated.release.notify_one();
        });

        assert_eq!(outcome.push.pushed, 1);
        let outbox = engine.store().outbox().await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].idempotency_token, late.idempotency_token);
        assert_eq!(engine.store().history().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn queued_sync_all_runs_after_the_current_pass() {
        let (engine, remote) = engine_with(Some(session())).await;
        engine
            .store()
            .append_local(Record::new_local(RecordKind::Scan, "X"))
            .await
            .unwrap();

        let (first, second) = tokio::join!(engine.sync_all(), engine.sync_all());

        assert_eq!(first.push.pushed + second.push.pushed, 1);
        assert_eq!(remote.insert_attempts().await, 1);
    }

    #[tokio::test]
    async fn state_changes_are_observable() {
        let (engine, _remote) = engine_with(Some(session())).await;
        let mut states = engine.subscribe_state();
        assert_eq!(*states.borrow_and_update(), SyncState::Offline);

        engine.sync_all().await;
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SyncState::Synced);
    }

    /// Memory store whose deletes always fail.
    #[derive(Clone, Default)]
    struct FailingDeletes(MemoryKeyValueStore);

    impl KeyValueStore for FailingDeletes {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value).await
        }

        async fn delete(&self, _keys: &[&str]) -> Result<usize> {
            Err(crate::Error::Database("disk I/O error".to_string()))
        }
    }

    #[tokio::test]
    async fn failing_legacy_cleanup_does_not_mark_pass_as_error() {
        let remote = MemoryRemoteStore::new();
        remote.add_membership("u1", "t1").await;
        let engine = SyncEngine::new(
            LocalStore::new(FailingDeletes::default()),
            remote.clone(),
            remote.clone(),
            StaticSessionProvider::new(Some(session())),
        );
        engine
            .store()
            .append_local(Record::new_local(RecordKind::Scan, "X"))
            .await
            .unwrap();

        let outcome = engine.sync_all().await;
        assert!(outcome.migration.error.is_some());
        assert_eq!(outcome.push.pushed, 1);
        assert!(!outcome.has_errors());
        assert_eq!(engine.state(), SyncState::Synced);

        // Still retried on the next pass
        let outcome = engine.sync_all().await;
        assert!(outcome.migration.error.is_some());
        assert!(!engine.store().legacy_cleaned().await.unwrap());
    }
}
