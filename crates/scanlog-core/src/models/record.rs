//! Record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Prefix for `local_id` values derived from a remote `server_id`.
const REMOTE_LOCAL_ID_PREFIX: &str = "remote-";

/// What produced a record's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Payload decoded from a scanned code
    Scan,
    /// Payload the user generated a code for
    Generate,
}

impl RecordKind {
    /// Wire/storage name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Generate => "generate",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scan" => Ok(Self::Scan),
            "generate" => Ok(Self::Generate),
            other => Err(Error::InvalidInput(format!("unknown record kind '{other}'"))),
        }
    }
}

/// The unit of synchronization.
///
/// Records are immutable once created; only `server_id`, `user_id`, `tenant_id`
/// and `synced` are filled in as the record moves through the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Device-local identifier, never reused
    pub local_id: String,
    /// Identifier assigned by the remote store
    #[serde(default)]
    pub server_id: Option<String>,
    /// Client-generated re-delivery guard, never regenerated
    pub idempotency_token: String,
    /// Owning user
    #[serde(default)]
    pub user_id: Option<String>,
    /// Owning tenant, may be resolved lazily on push
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    pub kind: RecordKind,
    pub payload: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// True once the remote store has accepted the record
    #[serde(default)]
    pub synced: bool,
}

impl Record {
    /// Create a new, not yet pushed, local record.
    #[must_use]
    pub fn new_local(kind: RecordKind, payload: impl Into<String>) -> Self {
        Self {
            local_id: Uuid::now_v7().to_string(),
            server_id: None,
            idempotency_token: Uuid::now_v7().to_string(),
            user_id: None,
            tenant_id: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            kind,
            payload: payload.into(),
            metadata: None,
            synced: false,
        }
    }

    /// Attach opaque metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Pin ownership up front instead of relying on lazy tenant resolution.
    #[must_use]
    pub fn with_owner(mut self, user_id: impl Into<String>, tenant_id: Option<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.tenant_id = tenant_id;
        self
    }

    /// Check whether this entry was created from a pulled remote row.
    pub fn is_remote_origin(&self) -> bool {
        self.local_id.starts_with(REMOTE_LOCAL_ID_PREFIX)
    }

    /// Payload preview truncated to `max_len` characters.
    #[must_use]
    pub fn payload_preview(&self, max_len: usize) -> String {
        self.payload
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }
}

/// Deterministic `local_id` for a record first seen through a pull.
pub fn remote_local_id(server_id: &str) -> String {
    format!("{REMOTE_LOCAL_ID_PREFIX}{server_id}")
}
