use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use scanlog_core::RecordKind;

#[derive(Parser)]
#[command(name = "scanlog")]
#[command(about = "Keep a local log of scanned and generated codes and sync it")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to remote store config (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a scanned or generated code
    #[command(alias = "new")]
    Add {
        /// Record kind
        #[arg(value_enum)]
        kind: KindArg,
        /// Code payload (read from stdin when omitted)
        payload: Vec<String>,
        /// Extra metadata as a JSON value
        #[arg(long, value_name = "JSON")]
        metadata: Option<String>,
    },
    /// List history, newest first
    List {
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List records waiting to be pushed
    Outbox {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show local sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push pending records and pull new ones
    Sync {
        /// Keep running and sync every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Scan,
    Generate,
}

impl From<KindArg> for RecordKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Scan => Self::Scan,
            KindArg::Generate => Self::Generate,
        }
    }
}
