//! Durable key-value store implementations

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::Database;
use crate::error::Result;

/// Durable string key-value store (async)
///
/// Values are opaque strings; callers JSON-encode structured values.
#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove every key in `keys`, returning how many were present
    async fn delete(&self, keys: &[&str]) -> Result<usize>;
}

/// libSQL implementation of `KeyValueStore`
#[derive(Clone)]
pub struct LibSqlKeyValueStore {
    db: Arc<Database>,
}

impl LibSqlKeyValueStore {
    /// Create a new store over an opened database
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }
}

impl KeyValueStore for LibSqlKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .db
            .connection()
            .query("SELECT value FROM kv_store WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .connection()
            .execute(
                "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize> {
        let conn = self.db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let mut removed = 0usize;
        for key in keys {
            match conn
                .execute("DELETE FROM kv_store WHERE key = ?", [*key])
                .await
            {
                Ok(rows) => removed += usize::try_from(rows).unwrap_or(usize::MAX),
                Err(e) => {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        Ok(removed)
    }
}

/// In-memory implementation of `KeyValueStore` (ephemeral runs and tests)
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .filter(|key| entries.remove(**key).is_some())
            .count())
    }
}
