use std::path::Path;

use scanlog_core::{Record, RecordKind};

use crate::commands::common::{open_store, parse_metadata, resolve_payload, CliStore};
use crate::error::CliError;

pub async fn run_add(
    kind: RecordKind,
    payload_parts: &[String],
    metadata: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let payload = resolve_payload(payload_parts)?;
    let metadata = parse_metadata(metadata)?;

    let store = open_store(db_path).await?;
    let record = add_record(&store, kind, payload, metadata).await?;

    println!("{}", record.local_id);
    Ok(())
}

pub async fn add_record(
    store: &CliStore,
    kind: RecordKind,
    payload: String,
    metadata: Option<serde_json::Value>,
) -> Result<Record, CliError> {
    let mut record = Record::new_local(kind, payload);
    if let Some(metadata) = metadata {
        record = record.with_metadata(metadata);
    }

    store.append_local(record.clone()).await?;
    Ok(record)
}
