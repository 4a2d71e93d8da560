//! Versioned schema for the local database

use libsql::Connection;

use crate::error::Result;

struct Migration {
    version: i64,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    statements: &["CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )"],
}];

/// Apply every migration newer than the stored schema version.
pub async fn run(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        (),
    )
    .await?;

    let current = schema_version(conn).await?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(conn, migration).await?;
        tracing::info!("Applied local schema version {}", migration.version);
    }
    Ok(())
}

pub async fn schema_version(conn: &Connection) -> Result<i64> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get::<i64>(0)?),
        None => Ok(0),
    }
}

/// One migration per transaction; libsql has no batch execute.
async fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute("BEGIN", ()).await?;

    let result = async {
        for statement in migration.statements {
            conn.execute(statement, ()).await?;
        }
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            [migration.version],
        )
        .await?;
        conn.execute("COMMIT", ()).await?;
        Ok::<_, crate::Error>(())
    }
    .await;

    if result.is_err() {
        conn.execute("ROLLBACK", ()).await.ok();
    }
    result
}
