use std::path::Path;
use std::time::Duration;

use scanlog_core::sync::{run_trigger_loop, SyncOutcome, SyncTrigger};
use tokio::sync::mpsc;

use crate::commands::common::{format_outcome_lines, open_engine};
use crate::error::CliError;

const TRIGGER_BUFFER: usize = 8;

pub async fn run_sync(
    as_json: bool,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let engine = open_engine(db_path, config_path).await?;
    let outcome = engine.sync_all().await;
    print_outcome(&outcome, as_json)
}

pub async fn run_sync_watch(
    interval_secs: u64,
    as_json: bool,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    if interval_secs == 0 {
        return Err(CliError::InvalidWatchInterval);
    }

    let engine = open_engine(db_path, config_path).await?;
    let (sender, receiver) = mpsc::channel(TRIGGER_BUFFER);

    let timer = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if sender.send(SyncTrigger::Manual).await.is_err() {
                break;
            }
        }
    });

    let mut print_error = None;
    let trigger_loop = run_trigger_loop(&engine, receiver, |trigger, outcome| {
        tracing::debug!("Pass triggered by {trigger} finished");
        if let Err(error) = print_outcome(outcome, as_json) {
            print_error.get_or_insert(error);
        }
    });

    tokio::select! {
        passes = trigger_loop => tracing::info!("Trigger loop ended after {passes} passes"),
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Interrupted; stopping sync");
        }
    }
    timer.abort();

    print_error.map_or(Ok(()), Err)
}

fn print_outcome(outcome: &SyncOutcome, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string(outcome)?);
    } else {
        for line in format_outcome_lines(outcome) {
            println!("{line}");
        }
    }
    Ok(())
}
