use std::path::Path;

use scanlog_core::util::unix_millis_now;
use scanlog_core::Record;

use crate::commands::common::{
    format_record_lines, open_store, record_to_list_item, RecordListItem,
};
use crate::error::CliError;

pub async fn run_list(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mut history = store.history().await?;
    history.truncate(limit);

    print_records(&history, as_json, "No records yet.")
}

pub async fn run_outbox(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let outbox = store.outbox().await?;

    print_records(&outbox, as_json, "Outbox is empty.")
}

fn print_records(records: &[Record], as_json: bool, empty_message: &str) -> Result<(), CliError> {
    let now = unix_millis_now();

    if as_json {
        let json_items = records
            .iter()
            .map(|record| record_to_list_item(record, now))
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{empty_message}");
        return Ok(());
    }

    for line in format_record_lines(records, now) {
        println!("{line}");
    }
    Ok(())
}
