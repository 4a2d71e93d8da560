//! Remote record store boundary.
//!
//! The sync engine talks to the shared relational store only through the
//! [`RemoteRecordStore`] and [`MembershipResolver`] traits. Two backends are
//! provided: [`SupabaseRecordStore`] (PostgREST over HTTP) and
//! [`MemoryRemoteStore`] (in-process, enforces the same uniqueness rule).

mod memory;
mod postgrest;

pub use memory::MemoryRemoteStore;
pub use postgrest::SupabaseRecordStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthSession;
use crate::models::{remote_local_id, Record, RecordKind};

/// PostgreSQL `unique_violation`.
pub const UNIQUE_VIOLATION_CODE: &str = "23505";
/// Remote column carrying the idempotency token.
pub const IDEMPOTENCY_KEY_COLUMN: &str = "idempotency_key";
/// Code used for failures that never reached the remote store.
pub const TRANSPORT_ERROR_CODE: &str = "transport";

/// Error reported by the remote store: `{code, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(TRANSPORT_ERROR_CODE, message)
    }

    /// Unique violation on the idempotency key, worded like PostgreSQL's detail line.
    pub fn duplicate_token(token: &str) -> Self {
        Self::new(
            UNIQUE_VIOLATION_CODE,
            format!("Key ({IDEMPOTENCY_KEY_COLUMN})=({token}) already exists."),
        )
    }

    /// The row already exists: a unique violation that names the idempotency key.
    ///
    /// Violations of any other unique constraint mean the row was not stored.
    pub fn is_unique_violation(&self) -> bool {
        self.code == UNIQUE_VIOLATION_CODE && self.message.contains(IDEMPOTENCY_KEY_COLUMN)
    }

    pub fn is_transport(&self) -> bool {
        self.code == TRANSPORT_ERROR_CODE
    }
}

/// Row sent to the remote store for a locally created record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInsert {
    pub idempotency_token: String,
    pub user_id: String,
    pub tenant_id: String,
    pub created_at: i64,
    pub kind: RecordKind,
    pub payload: String,
    pub metadata: Option<serde_json::Value>,
}

impl RemoteInsert {
    pub fn from_record(record: &Record, user_id: &str, tenant_id: &str) -> Self {
        Self {
            idempotency_token: record.idempotency_token.clone(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            created_at: record.created_at,
            kind: record.kind,
            payload: record.payload.clone(),
            metadata: record.metadata.clone(),
        }
    }
}

/// Acknowledgement of an accepted insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertedRecord {
    pub server_id: Option<String>,
}

/// Filter for an incremental pull: `created_at >= since` owned by `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    /// Inclusive lower bound (Unix ms)
    pub since: i64,
    pub owner: String,
}

/// A record as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub server_id: String,
    pub idempotency_token: Option<String>,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    /// Unix ms
    pub created_at: i64,
    pub kind: RecordKind,
    pub payload: String,
    pub metadata: Option<serde_json::Value>,
}

impl RemoteRecord {
    /// Build the History entry for a record first seen through a pull.
    pub fn into_history_entry(self) -> Record {
        let local_id = remote_local_id(&self.server_id);
        Record {
            idempotency_token: self
                .idempotency_token
                .unwrap_or_else(|| local_id.clone()),
            local_id,
            server_id: Some(self.server_id),
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            created_at: self.created_at,
            kind: self.kind,
            payload: self.payload,
            metadata: self.metadata,
            synced: true,
        }
    }
}

/// Shared record store with a uniqueness constraint on the idempotency token.
#[allow(async_fn_in_trait)]
pub trait RemoteRecordStore {
    /// Insert a row; a repeated idempotency token fails with a unique violation.
    async fn insert(
        &self,
        session: &AuthSession,
        record: &RemoteInsert,
    ) -> Result<InsertedRecord, RemoteError>;

    /// Rows matching `query`, newest first.
    async fn query(
        &self,
        session: &AuthSession,
        query: &RecordQuery,
    ) -> Result<Vec<RemoteRecord>, RemoteError>;
}

/// Looks up the tenant a user belongs to.
#[allow(async_fn_in_trait)]
pub trait MembershipResolver {
    /// First membership found for `user_id`. No ordering is guaranteed when a
    /// user belongs to several tenants.
    async fn first_tenant_for(
        &self,
        session: &AuthSession,
        user_id: &str,
    ) -> Result<Option<String>, RemoteError>;
}
