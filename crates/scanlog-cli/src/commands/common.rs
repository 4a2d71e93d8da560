use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use scanlog_core::auth::StaticSessionProvider;
use scanlog_core::config::RemoteConfig;
use scanlog_core::db::{Database, LibSqlKeyValueStore};
use scanlog_core::remote::SupabaseRecordStore;
use scanlog_core::store::LocalStore;
use scanlog_core::sync::{SkipReason, SyncEngine, SyncOutcome};
use scanlog_core::Record;
use serde::Serialize;

use crate::error::CliError;

pub const ENV_DB_PATH: &str = "SCANLOG_DB_PATH";
pub const ENV_ACCESS_TOKEN: &str = "SCANLOG_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "SCANLOG_USER_ID";
pub const ENV_TOKEN_EXPIRES_AT: &str = "SCANLOG_TOKEN_EXPIRES_AT";

const PREVIEW_CHARS: usize = 60;

pub type CliStore = LocalStore<LibSqlKeyValueStore>;
pub type CliEngine = SyncEngine<
    LibSqlKeyValueStore,
    SupabaseRecordStore,
    SupabaseRecordStore,
    StaticSessionProvider,
>;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub local_id: String,
    pub server_id: Option<String>,
    pub kind: String,
    pub payload: String,
    pub preview: String,
    pub created_at: i64,
    pub relative_time: String,
    pub synced: bool,
    pub origin: &'static str,
}

pub fn record_to_list_item(record: &Record, now_ms: i64) -> RecordListItem {
    RecordListItem {
        local_id: record.local_id.clone(),
        server_id: record.server_id.clone(),
        kind: record.kind.to_string(),
        payload: record.payload.clone(),
        preview: record_preview(record, PREVIEW_CHARS),
        created_at: record.created_at,
        relative_time: format_relative_time(record.created_at, now_ms),
        synced: record.synced,
        origin: if record.is_remote_origin() {
            "remote"
        } else {
            "local"
        },
    }
}

pub fn format_record_lines(records: &[Record], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let marker = if record.synced { ' ' } else { '*' };
            format!(
                "{marker} {:<8}  {:<9}  {:>8}  {}",
                short_id(&record.local_id),
                record.kind,
                format_relative_time(record.created_at, now_ms),
                record_preview(record, PREVIEW_CHARS)
            )
        })
        .collect()
}

pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let preview = record.payload_preview(max_chars);
    if record.payload.chars().count() > preview.chars().count() {
        format!("{preview}...")
    } else {
        preview
    }
}

fn short_id(local_id: &str) -> String {
    local_id.chars().take(8).collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn format_outcome_lines(outcome: &SyncOutcome) -> Vec<String> {
    let mut lines = vec![format!("State: {}", outcome.state())];

    let migration = &outcome.migration;
    if let Some(error) = &migration.error {
        lines.push(format!("Legacy cleanup failed: {error}"));
    } else if migration.deleted > 0 {
        lines.push(format!("Legacy cleanup: removed {} keys", migration.deleted));
    }

    let push = &outcome.push;
    if push.reason == Some(SkipReason::NoSession) {
        lines.push(format!(
            "Not signed in: records stay queued (set {ENV_ACCESS_TOKEN} and {ENV_USER_ID})"
        ));
        return lines;
    }
    if let Some(error) = &push.error {
        lines.push(format!("Push failed: {error}"));
    } else {
        let mut line = format!("Pushed {} records", push.pushed);
        if push.duplicates > 0 {
            line.push_str(&format!(" ({} already on server)", push.duplicates));
        }
        if push.failed > 0 {
            line.push_str(&format!(", {} still queued", push.failed));
        }
        lines.push(line);
    }
    for failure in &push.failures {
        lines.push(format!("  {}: {}", short_id(&failure.local_id), failure.error));
    }

    let pull = &outcome.pull;
    if let Some(error) = &pull.error {
        lines.push(format!("Pull failed: {error}"));
    } else {
        lines.push(format!(
            "Pulled {} new records, reconciled {} (watermark {})",
            pull.pulled,
            pull.reconciled,
            format_sync_timestamp(pull.watermark)
        ));
    }

    lines
}

pub fn resolve_payload(payload_parts: &[String]) -> Result<String, CliError> {
    if let Some(payload) = normalize_content(&payload_parts.join(" ")) {
        return Ok(payload);
    }

    if let Some(payload) = read_piped_stdin()? {
        return Ok(payload);
    }

    Err(CliError::EmptyPayload)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_metadata(raw: Option<&str>) -> Result<Option<serde_json::Value>, CliError> {
    let Some(raw) = raw.and_then(normalize_content) else {
        return Ok(None);
    };
    let value = serde_json::from_str::<serde_json::Value>(&raw)
        .map_err(|error| CliError::InvalidMetadata(error.to_string()))?;
    Ok((!value.is_null()).then_some(value))
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scanlog")
        .join("scanlog.db")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scanlog")
        .join("config.json")
}

pub async fn open_store(db_path: &Path) -> Result<CliStore, CliError> {
    let db = Database::open(db_path).await?;
    Ok(LocalStore::new(LibSqlKeyValueStore::new(db)))
}

/// Explicit `--config` file, then environment, then the default config file.
pub fn load_remote_config(config_path: Option<&Path>) -> Result<RemoteConfig, CliError> {
    if let Some(path) = config_path {
        return Ok(RemoteConfig::load_from_path(path)?);
    }

    if let Some(config) = RemoteConfig::from_env()? {
        return Ok(config);
    }

    let default_path = default_config_path();
    if default_path.exists() {
        return Ok(RemoteConfig::load_from_path(&default_path)?);
    }

    Err(CliError::SyncNotConfigured(default_path.display().to_string()))
}

pub fn session_from_env() -> Result<StaticSessionProvider, CliError> {
    session_from_lookup(|name| env::var(name).ok())
}

pub fn session_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<StaticSessionProvider, CliError> {
    let expires_at = match normalize_content(&lookup(ENV_TOKEN_EXPIRES_AT).unwrap_or_default()) {
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
            CliError::Config(format!(
                "{ENV_TOKEN_EXPIRES_AT} must be a Unix timestamp in seconds"
            ))
        })?),
        None => None,
    };

    Ok(StaticSessionProvider::from_parts(
        lookup(ENV_ACCESS_TOKEN),
        lookup(ENV_USER_ID),
        expires_at,
    ))
}

pub async fn open_engine(
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<CliEngine, CliError> {
    let config = load_remote_config(config_path)?;
    let remote = SupabaseRecordStore::new(config)?;
    let store = open_store(db_path).await?;
    let sessions = session_from_env()?;
    Ok(SyncEngine::new(store, remote.clone(), remote, sessions))
}
