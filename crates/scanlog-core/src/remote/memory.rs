//! In-process remote store.
//!
//! Enforces the idempotency-key uniqueness constraint like the real table and
//! supports fault injection so engine behavior under partial failure can be
//! exercised without a network.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{
    InsertedRecord, MembershipResolver, RecordQuery, RemoteError, RemoteInsert, RemoteRecord,
    RemoteRecordStore,
};
use crate::auth::AuthSession;

#[derive(Default)]
struct MemoryRemoteState {
    rows: Vec<RemoteRecord>,
    next_id: u64,
    memberships: BTreeMap<String, Vec<String>>,
    failing_tokens: HashSet<String>,
    query_failure: Option<RemoteError>,
    membership_failure: Option<RemoteError>,
    insert_attempts: usize,
}

#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<MemoryRemoteState>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row as if another device had inserted it. Returns its server id.
    pub async fn seed(&self, mut record: RemoteRecord) -> String {
        let mut state = self.state.lock().await;
        if record.server_id.is_empty() {
            state.next_id += 1;
            record.server_id = state.next_id.to_string();
        } else if let Ok(explicit) = record.server_id.parse::<u64>() {
            state.next_id = state.next_id.max(explicit);
        }
        let server_id = record.server_id.clone();
        state.rows.push(record);
        server_id
    }

    pub async fn add_membership(&self, user_id: &str, tenant_id: &str) {
        self.state
            .lock()
            .await
            .memberships
            .entry(user_id.to_string())
            .or_default()
            .push(tenant_id.to_string());
    }

    /// Fail every insert carrying `token` with a transport error.
    pub async fn fail_inserts_for(&self, token: &str) {
        self.state
            .lock()
            .await
            .failing_tokens
            .insert(token.to_string());
    }

    /// Fail every query with `error` until cleared with `None`.
    pub async fn set_query_failure(&self, error: Option<RemoteError>) {
        self.state.lock().await.query_failure = error;
    }

    /// Fail every membership lookup with `error` until cleared with `None`.
    pub async fn set_membership_failure(&self, error: Option<RemoteError>) {
        self.state.lock().await.membership_failure = error;
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.failing_tokens.clear();
        state.query_failure = None;
        state.membership_failure = None;
    }

    /// All stored rows in insertion order.
    pub async fn rows(&self) -> Vec<RemoteRecord> {
        self.state.lock().await.rows.clone()
    }

    /// Insert calls seen, including rejected ones.
    pub async fn insert_attempts(&self) -> usize {
        self.state.lock().await.insert_attempts
    }
}

impl RemoteRecordStore for MemoryRemoteStore {
    async fn insert(
        &self,
        _session: &AuthSession,
        record: &RemoteInsert,
    ) -> Result<InsertedRecord, RemoteError> {
        let mut state = self.state.lock().await;
        state.insert_attempts += 1;

        if state.failing_tokens.contains(&record.idempotency_token) {
            return Err(RemoteError::transport("simulated network failure"));
        }

        let duplicate = state.rows.iter().any(|row| {
            row.idempotency_token.as_deref() == Some(record.idempotency_token.as_str())
        });
        if duplicate {
            return Err(RemoteError::duplicate_token(&record.idempotency_token));
        }

        state.next_id += 1;
        let server_id = state.next_id.to_string();
        state.rows.push(RemoteRecord {
            server_id: server_id.clone(),
            idempotency_token: Some(record.idempotency_token.clone()),
            user_id: Some(record.user_id.clone()),
            tenant_id: Some(record.tenant_id.clone()),
            created_at: record.created_at,
            kind: record.kind,
            payload: record.payload.clone(),
            metadata: record.metadata.clone(),
        });

        Ok(InsertedRecord {
            server_id: Some(server_id),
        })
    }

    async fn query(
        &self,
        _session: &AuthSession,
        query: &RecordQuery,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        let state = self.state.lock().await;
        if let Some(error) = &state.query_failure {
            return Err(error.clone());
        }

        let mut rows = state
            .rows
            .iter()
            .filter(|row| row.created_at >= query.since)
            .filter(|row| row.user_id.as_deref() == Some(query.owner.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

impl MembershipResolver for MemoryRemoteStore {
    async fn first_tenant_for(
        &self,
        _session: &AuthSession,
        user_id: &str,
    ) -> Result<Option<String>, RemoteError> {
        let state = self.state.lock().await;
        if let Some(error) = &state.membership_failure {
            return Err(error.clone());
        }
        Ok(state
            .memberships
            .get(user_id)
            .and_then(|tenants| tenants.first().cloned()))
    }
}
