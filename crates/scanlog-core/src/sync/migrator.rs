//! One-shot removal of keys left behind by the previous sync scheme.

use serde::Serialize;

use crate::db::KeyValueStore;
use crate::error::Result;
use crate::store::{keys, LocalStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Legacy keys that existed and were removed on this call
    pub deleted: usize,
    /// The flag was already set; nothing was attempted
    pub already_done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationReport {
    pub fn from_error(error: &impl std::fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

pub struct Migrator<'a, K> {
    store: &'a LocalStore<K>,
}

impl<'a, K: KeyValueStore> Migrator<'a, K> {
    pub const fn new(store: &'a LocalStore<K>) -> Self {
        Self { store }
    }

    /// Delete the legacy keys once per installation.
    ///
    /// The flag is only set after the deletion succeeds; a failed deletion is
    /// returned and retried on the next call.
    pub async fn migrate_once(&self) -> Result<MigrationReport> {
        if self.store.legacy_cleaned().await? {
            return Ok(MigrationReport {
                already_done: true,
                ..MigrationReport::default()
            });
        }

        let deleted = match self.store.kv().delete(keys::LEGACY_KEYS).await {
            Ok(deleted) => deleted,
            Err(error) => {
                tracing::warn!("Legacy key cleanup failed, will retry next pass: {error}");
                return Err(error);
            }
        };

        self.store.mark_legacy_cleaned().await?;
        tracing::info!("Removed {deleted} legacy sync keys");

        Ok(MigrationReport {
            deleted,
            ..MigrationReport::default()
        })
    }
}
