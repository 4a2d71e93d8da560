//! libSQL connection handle

use std::path::Path;

use libsql::{Builder, Connection, Database as LibSqlDatabase};

use super::migrations;
use crate::error::Result;

/// Local libSQL database with the scanlog schema applied.
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file at `path`, creating parent
    /// directories as needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Builder::new_local(path).build().await?;
        let database = Self::initialize(db).await?;
        tracing::debug!("Opened local store at {}", path.display());
        Ok(database)
    }

    /// Private in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::initialize(db).await
    }

    async fn initialize(db: LibSqlDatabase) -> Result<Self> {
        let conn = db.connect()?;
        // journal_mode answers with a row; in-memory databases stay in MEMORY mode
        conn.query("PRAGMA journal_mode = WAL", ()).await.ok();
        conn.execute("PRAGMA synchronous = NORMAL", ()).await.ok();
        migrations::run(&conn).await?;
        Ok(Self { _db: db, conn })
    }

    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
