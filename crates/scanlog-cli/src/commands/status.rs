use std::path::Path;

use scanlog_core::auth::SessionProvider;
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, open_store, session_from_env, CliStore};
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub outbox: usize,
    pub history: usize,
    pub unsynced: usize,
    pub pull_watermark: i64,
    pub legacy_cleaned: bool,
    pub signed_in: bool,
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let signed_in = session_from_env()?
        .current_session()
        .await
        .is_some_and(|session| session.is_usable());
    let report = collect_status(&store, signed_in).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for line in format_status_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

pub async fn collect_status(store: &CliStore, signed_in: bool) -> Result<StatusReport, CliError> {
    let outbox = store.outbox().await?;
    let history = store.history().await?;

    Ok(StatusReport {
        outbox: outbox.len(),
        history: history.len(),
        unsynced: history.iter().filter(|record| !record.synced).count(),
        pull_watermark: store.watermark().await?,
        legacy_cleaned: store.legacy_cleaned().await?,
        signed_in,
    })
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let watermark = if report.pull_watermark > 0 {
        format_sync_timestamp(report.pull_watermark)
    } else {
        "never pulled".to_string()
    };

    let session = if report.signed_in {
        "signed in"
    } else {
        "not signed in"
    };
    let legacy = if report.legacy_cleaned {
        "cleaned"
    } else {
        "pending cleanup"
    };

    vec![
        format!("Outbox:     {} pending", report.outbox),
        format!("History:    {} records ({} not synced)", report.history, report.unsynced),
        format!("Pulled:     {watermark}"),
        format!("Session:    {session}"),
        format!("Legacy:     {legacy}"),
    ]
}
