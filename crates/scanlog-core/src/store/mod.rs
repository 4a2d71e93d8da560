//! Outbox, History, pull watermark and legacy flag over a key-value store.
//!
//! Every mutation is a read-modify-write against the latest persisted value,
//! serialized by one async mutex, so a record appended while a sync is running
//! is never lost to a stale in-memory copy.

pub mod keys;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::db::KeyValueStore;
use crate::error::Result;
use crate::models::Record;
use crate::remote::RemoteRecord;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// What happened to History.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryChangeKind {
    /// A local record was created
    Appended,
    /// A pushed record was confirmed by the remote store
    Confirmed,
    /// Pulled records were merged
    Merged,
}

/// Notification published after every History mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryChange {
    pub kind: HistoryChangeKind,
    /// Entries added or updated by the mutation
    pub count: usize,
}

/// Values attached to a History entry once the remote store accepts it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Confirmation {
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub server_id: Option<String>,
}

/// Result of merging a pulled batch into History.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// New remote-origin entries
    pub inserted: usize,
    /// Local entries that gained their `server_id`
    pub reconciled: usize,
    /// Rows already present
    pub skipped: usize,
}

/// Handle to the durable local state the sync engine works on.
#[derive(Clone)]
pub struct LocalStore<K> {
    kv: K,
    write_lock: Arc<Mutex<()>>,
    changes: broadcast::Sender<HistoryChange>,
}

impl<K: KeyValueStore> LocalStore<K> {
    pub fn new(kv: K) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            kv,
            write_lock: Arc::new(Mutex::new(())),
            changes,
        }
    }

    /// Underlying key-value store.
    pub const fn kv(&self) -> &K {
        &self.kv
    }

    /// Register for History change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryChange> {
        self.changes.subscribe()
    }

    /// Pending records, oldest first.
    pub async fn outbox(&self) -> Result<Vec<Record>> {
        self.load_list(keys::OUTBOX).await
    }

    /// All known records, newest first.
    pub async fn history(&self) -> Result<Vec<Record>> {
        self.load_list(keys::HISTORY).await
    }

    /// Queue a locally created record and show it in History right away.
    pub async fn append_local(&self, record: Record) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut outbox = self.load_list::<Record>(keys::OUTBOX).await?;
        if outbox
            .iter()
            .any(|queued| queued.idempotency_token == record.idempotency_token)
        {
            tracing::debug!(
                "Record {} is already queued; ignoring duplicate append",
                record.local_id
            );
            return Ok(());
        }

        let mut history = self.load_list::<Record>(keys::HISTORY).await?;
        outbox.push(record.clone());
        if !history
            .iter()
            .any(|entry| entry.idempotency_token == record.idempotency_token)
        {
            history.push(record);
            sort_newest_first(&mut history);
        }

        self.save(keys::OUTBOX, &outbox).await?;
        self.save(keys::HISTORY, &history).await?;
        self.publish(HistoryChangeKind::Appended, 1);
        Ok(())
    }

    /// Mark the record with `token` as synced and drop it from the Outbox.
    ///
    /// History is written before the Outbox: a crash in between leaves the
    /// record queued, and the next push sees a duplicate key and confirms again.
    /// Returns `false` when no queued record carries `token`.
    pub async fn confirm_pushed(&self, token: &str, confirmation: Confirmation) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut outbox = self.load_list::<Record>(keys::OUTBOX).await?;
        let Some(position) = outbox
            .iter()
            .position(|queued| queued.idempotency_token == token)
        else {
            return Ok(false);
        };
        let queued = outbox.remove(position);

        let mut history = self.load_list::<Record>(keys::HISTORY).await?;
        if let Some(entry) = history
            .iter_mut()
            .find(|entry| entry.idempotency_token == token)
        {
            apply_confirmation(entry, &confirmation);
        } else {
            let mut entry = queued;
            apply_confirmation(&mut entry, &confirmation);
            history.push(entry);
            sort_newest_first(&mut history);
        }

        self.save(keys::HISTORY, &history).await?;
        self.save(keys::OUTBOX, &outbox).await?;
        self.publish(HistoryChangeKind::Confirmed, 1);
        Ok(true)
    }

    /// Merge pulled rows into History without duplicating known records.
    pub async fn merge_pulled(&self, rows: Vec<RemoteRecord>) -> Result<MergeOutcome> {
        let _guard = self.write_lock.lock().await;

        let mut history = self.load_list::<Record>(keys::HISTORY).await?;
        let mut known_server_ids = history
            .iter()
            .filter_map(|entry| entry.server_id.clone())
            .collect::<HashSet<_>>();
        let mut by_token = history
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.idempotency_token.clone(), index))
            .collect::<HashMap<_, _>>();

        let mut outcome = MergeOutcome::default();
        for row in rows {
            if known_server_ids.contains(&row.server_id) {
                outcome.skipped += 1;
                continue;
            }

            let local_match = row
                .idempotency_token
                .as_ref()
                .and_then(|token| by_token.get(token).copied());
            if let Some(index) = local_match {
                let entry = &mut history[index];
                if entry.server_id.is_none() {
                    entry.server_id = Some(row.server_id.clone());
                    entry.synced = true;
                    entry.user_id = entry.user_id.take().or(row.user_id);
                    entry.tenant_id = entry.tenant_id.take().or(row.tenant_id);
                    known_server_ids.insert(row.server_id);
                    outcome.reconciled += 1;
                } else {
                    // Same token already bound to a different server row
                    outcome.skipped += 1;
                }
                continue;
            }

            known_server_ids.insert(row.server_id.clone());
            let entry = row.into_history_entry();
            by_token.insert(entry.idempotency_token.clone(), history.len());
            history.push(entry);
            outcome.inserted += 1;
        }

        sort_newest_first(&mut history);
        self.save(keys::HISTORY, &history).await?;

        let changed = outcome.inserted + outcome.reconciled;
        if changed > 0 {
            self.publish(HistoryChangeKind::Merged, changed);
        }
        Ok(outcome)
    }

    /// Inclusive lower bound for the next pull; the epoch when never set.
    pub async fn watermark(&self) -> Result<i64> {
        Ok(self.load_value(keys::PULL_WATERMARK).await?.unwrap_or(0))
    }

    /// Advance the watermark. Never moves it backwards; returns the stored value.
    pub async fn advance_watermark(&self, candidate: i64) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .load_value::<i64>(keys::PULL_WATERMARK)
            .await?
            .unwrap_or(0);
        let next = current.max(candidate);
        if next != current {
            self.save(keys::PULL_WATERMARK, &next).await?;
        }
        Ok(next)
    }

    pub async fn legacy_cleaned(&self) -> Result<bool> {
        Ok(self
            .load_value(keys::LEGACY_CLEANED)
            .await?
            .unwrap_or(false))
    }

    pub async fn mark_legacy_cleaned(&self) -> Result<()> {
        self.save(keys::LEGACY_CLEANED, &true).await
    }

    async fn load_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        Ok(self.load_value(key).await?.unwrap_or_default())
    }

    async fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.set(key, &raw).await
    }

    fn publish(&self, kind: HistoryChangeKind, count: usize) {
        // No subscribers is fine
        let _ = self.changes.send(HistoryChange { kind, count });
    }
}

fn apply_confirmation(entry: &mut Record, confirmation: &Confirmation) {
    entry.synced = true;
    if confirmation.user_id.is_some() {
        entry.user_id.clone_from(&confirmation.user_id);
    }
    if entry.tenant_id.is_none() {
        entry.tenant_id.clone_from(&confirmation.tenant_id);
    }
    if entry.server_id.is_none() {
        entry.server_id.clone_from(&confirmation.server_id);
    }
}

fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
