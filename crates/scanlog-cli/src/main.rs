//! scanlog CLI - record scanned and generated codes offline, sync when online

mod cli;
mod commands;
mod error;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::add::run_add;
use crate::commands::common::resolve_db_path;
use crate::commands::list::{run_list, run_outbox};
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_sync_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "scanlog=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config_path = cli.config.as_deref();

    match cli.command {
        Some(Commands::Add {
            kind,
            payload,
            metadata,
        }) => run_add(kind.into(), &payload, metadata.as_deref(), &db_path).await?,
        Some(Commands::List { limit, json }) => run_list(limit, json, &db_path).await?,
        Some(Commands::Outbox { json }) => run_outbox(json, &db_path).await?,
        Some(Commands::Status { json }) => run_status(json, &db_path).await?,
        Some(Commands::Sync { watch: None, json }) => {
            run_sync(json, &db_path, config_path).await?;
        }
        Some(Commands::Sync {
            watch: Some(seconds),
            json,
        }) => run_sync_watch(seconds, json, &db_path, config_path).await?,
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}
