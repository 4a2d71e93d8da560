//! Outbox -> remote store.

use serde::Serialize;

use super::{SkipReason, SyncError};
use crate::auth::AuthSession;
use crate::db::KeyValueStore;
use crate::error::Result;
use crate::models::Record;
use crate::remote::{MembershipResolver, RemoteInsert, RemoteRecordStore};
use crate::store::{Confirmation, LocalStore};

/// A record that stayed in the Outbox on this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushFailure {
    pub local_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    /// Records confirmed and removed from the Outbox
    pub pushed: usize,
    /// Of `pushed`, records the remote store already had
    pub duplicates: usize,
    /// Records left in the Outbox for the next pass
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<PushFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::default()
        }
    }

    pub fn from_error(error: &impl std::fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

enum Pushed {
    Inserted,
    Duplicate,
}

pub struct PushEngine<'a, K, R, M> {
    store: &'a LocalStore<K>,
    remote: &'a R,
    members: &'a M,
}

impl<'a, K, R, M> PushEngine<'a, K, R, M>
where
    K: KeyValueStore,
    R: RemoteRecordStore,
    M: MembershipResolver,
{
    pub const fn new(store: &'a LocalStore<K>, remote: &'a R, members: &'a M) -> Self {
        Self {
            store,
            remote,
            members,
        }
    }

    /// Push every queued record once.
    ///
    /// A failing record does not stop the rest of the batch. Only local
    /// storage failures abort the pass.
    pub async fn push_outbox(&self, session: Option<&AuthSession>) -> Result<PushReport> {
        let Some(session) = session.filter(|session| session.is_usable()) else {
            tracing::debug!("Skipping push: no authenticated session");
            return Ok(PushReport::skipped(SkipReason::NoSession));
        };

        let outbox = self.store.outbox().await?;
        if outbox.is_empty() {
            return Ok(PushReport::default());
        }
        tracing::debug!("Pushing {} queued records", outbox.len());

        let mut report = PushReport::default();
        for record in &outbox {
            match self.push_one(session, record).await {
                Ok(Pushed::Inserted) => report.pushed += 1,
                Ok(Pushed::Duplicate) => {
                    report.pushed += 1;
                    report.duplicates += 1;
                }
                Err(SyncError::Storage(error)) => return Err(error),
                Err(error) => {
                    tracing::warn!("Push of {} failed: {error}", record.local_id);
                    report.failed += 1;
                    report.failures.push(PushFailure {
                        local_id: record.local_id.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Push finished: {} pushed ({} duplicates), {} failed",
            report.pushed,
            report.duplicates,
            report.failed
        );
        Ok(report)
    }

    async fn push_one(
        &self,
        session: &AuthSession,
        record: &Record,
    ) -> std::result::Result<Pushed, SyncError> {
        let user_id = record
            .user_id
            .clone()
            .unwrap_or_else(|| session.user.id.clone());
        let tenant_id = match &record.tenant_id {
            Some(tenant_id) => tenant_id.clone(),
            None => self.resolve_tenant(session, &user_id).await?,
        };

        let insert = RemoteInsert::from_record(record, &user_id, &tenant_id);
        let (server_id, outcome) = match self.remote.insert(session, &insert).await {
            Ok(inserted) => (inserted.server_id, Pushed::Inserted),
            Err(error) if error.is_unique_violation() => {
                tracing::debug!(
                    "Record {} already exists remotely; confirming",
                    record.local_id
                );
                (None, Pushed::Duplicate)
            }
            Err(error) => return Err(SyncError::from_remote(error)),
        };

        self.store
            .confirm_pushed(
                &record.idempotency_token,
                Confirmation {
                    user_id: Some(user_id),
                    tenant_id: Some(tenant_id),
                    server_id,
                },
            )
            .await?;
        Ok(outcome)
    }

    async fn resolve_tenant(
        &self,
        session: &AuthSession,
        user_id: &str,
    ) -> std::result::Result<String, SyncError> {
        self.members
            .first_tenant_for(session, user_id)
            .await
            .map_err(SyncError::from_remote)?
            .ok_or_else(|| SyncError::TenantUnresolved(user_id.to_string()))
    }
}
