use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] scanlog_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No payload provided")]
    EmptyPayload,
    #[error("Metadata must be valid JSON: {0}")]
    InvalidMetadata(String),
    #[error("Watch interval must be at least one second")]
    InvalidWatchInterval,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync is not configured: pass --config, create {0}, or set SCANLOG_SUPABASE_* vars")]
    SyncNotConfigured(String),
}
