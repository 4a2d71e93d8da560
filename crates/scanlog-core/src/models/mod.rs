//! Data models for scanlog

mod record;

pub use record::{remote_local_id, Record, RecordKind};
