//! PostgREST (Supabase) implementation of the remote store.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    InsertedRecord, MembershipResolver, RecordQuery, RemoteError, RemoteInsert, RemoteRecord,
    RemoteRecordStore, IDEMPOTENCY_KEY_COLUMN,
};
use crate::auth::AuthSession;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::models::RecordKind;
use crate::util::compact_text;

/// Rows requested per page. PostgREST may cap pages lower (`max-rows`).
const PAGE_SIZE: usize = 1000;

#[derive(Clone)]
pub struct SupabaseRecordStore {
    config: RemoteConfig,
    client: Client,
    page_size: usize,
}

impl SupabaseRecordStore {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            config,
            client,
            page_size: PAGE_SIZE,
        })
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.config.rest_url())
    }

    fn authorized(&self, request: RequestBuilder, session: &AuthSession) -> RequestBuilder {
        request
            .header("apikey", &self.config.supabase_anon_key)
            .bearer_auth(&session.access_token)
            .header("Accept", "application/json")
    }

    async fn send(request: RequestBuilder) -> std::result::Result<reqwest::Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|error| RemoteError::transport(error.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(parse_api_error(status, &body))
    }
}

impl RemoteRecordStore for SupabaseRecordStore {
    async fn insert(
        &self,
        session: &AuthSession,
        record: &RemoteInsert,
    ) -> std::result::Result<InsertedRecord, RemoteError> {
        let row = InsertRow::try_from(record)?;
        let request = self.authorized(
            self.client
                .post(self.table_url(&self.config.records_table))
                .header("Prefer", "return=representation")
                .json(&row),
            session,
        );

        let response = Self::send(request).await?;
        let rows = response
            .json::<Vec<InsertedRow>>()
            .await
            .map_err(|error| RemoteError::transport(format!("invalid insert response: {error}")))?;

        Ok(InsertedRecord {
            server_id: rows.into_iter().next().and_then(|row| server_id_text(&row.id)),
        })
    }

    /// Pages through every matching row.
    ///
    /// The server may return fewer rows than requested, so only an empty page
    /// ends the scan.
    async fn query(
        &self,
        session: &AuthSession,
        query: &RecordQuery,
    ) -> std::result::Result<Vec<RemoteRecord>, RemoteError> {
        let since = millis_to_datetime(query.since)?.to_rfc3339();
        let mut records = Vec::new();

        loop {
            let request = self.authorized(
                self.client
                    .get(self.table_url(&self.config.records_table))
                    .query(&[
                        ("select", "*".to_string()),
                        ("created_at", format!("gte.{since}")),
                        ("user_id", format!("eq.{}", query.owner)),
                        ("order", "created_at.desc,id.desc".to_string()),
                        ("limit", self.page_size.to_string()),
                        ("offset", records.len().to_string()),
                    ]),
                session,
            );

            let response = Self::send(request).await?;
            let rows = response.json::<Vec<RecordRow>>().await.map_err(|error| {
                RemoteError::transport(format!("invalid query response: {error}"))
            })?;
            if rows.is_empty() {
                break;
            }
            for row in rows {
                records.push(RemoteRecord::try_from(row)?);
            }
        }

        tracing::debug!("Fetched {} remote rows", records.len());
        Ok(records)
    }
}

impl MembershipResolver for SupabaseRecordStore {
    async fn first_tenant_for(
        &self,
        session: &AuthSession,
        user_id: &str,
    ) -> std::result::Result<Option<String>, RemoteError> {
        let request = self.authorized(
            self.client
                .get(self.table_url(&self.config.memberships_table))
                .query(&[
                    ("select", "tenant_id".to_string()),
                    ("user_id", format!("eq.{user_id}")),
                    ("limit", "1".to_string()),
                ]),
            session,
        );

        let response = Self::send(request).await?;
        let rows = response
            .json::<Vec<MembershipRow>>()
            .await
            .map_err(|error| {
                RemoteError::transport(format!("invalid membership response: {error}"))
            })?;

        Ok(rows
            .into_iter()
            .find_map(|row| row.tenant_id.as_ref().and_then(server_id_text)))
    }
}

#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    idempotency_key: &'a str,
    user_id: &'a str,
    tenant_id: &'a str,
    kind: RecordKind,
    payload: &'a str,
    metadata: Option<&'a serde_json::Value>,
    created_at: String,
}

impl<'a> TryFrom<&'a RemoteInsert> for InsertRow<'a> {
    type Error = RemoteError;

    fn try_from(value: &'a RemoteInsert) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            idempotency_key: &value.idempotency_token,
            user_id: &value.user_id,
            tenant_id: &value.tenant_id,
            kind: value.kind,
            payload: &value.payload,
            metadata: value.metadata.as_ref(),
            created_at: millis_to_datetime(value.created_at)?.to_rfc3339(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct InsertedRow {
    id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MembershipRow {
    tenant_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RecordRow {
    id: serde_json::Value,
    #[serde(default)]
    idempotency_key: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    tenant_id: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    kind: RecordKind,
    payload: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

impl TryFrom<RecordRow> for RemoteRecord {
    type Error = RemoteError;

    fn try_from(row: RecordRow) -> std::result::Result<Self, Self::Error> {
        let server_id = server_id_text(&row.id)
            .ok_or_else(|| RemoteError::transport("record row has no usable id"))?;
        Ok(Self {
            server_id,
            idempotency_token: row.idempotency_key,
            user_id: row.user_id,
            tenant_id: row.tenant_id.as_ref().and_then(server_id_text),
            created_at: row.created_at.timestamp_millis(),
            kind: row.kind,
            payload: row.payload,
            metadata: row.metadata.filter(|value| !value.is_null()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Map an error response to `{code, message}`.
///
/// PostgREST reports constraint violations as HTTP 409 with the PostgreSQL
/// error code in the body. A 409 without one (a proxy page, an empty body)
/// keeps its HTTP code so it is never taken for a duplicate.
fn parse_api_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<PostgrestErrorBody>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|payload| payload.code.clone())
        .filter(|code| !code.trim().is_empty())
        .unwrap_or_else(|| format!("http_{}", status.as_u16()));

    // The constraint name is in `message`, the column in `details`; keep
    // whichever names the idempotency key.
    let message = parsed
        .and_then(|payload| {
            let texts = [payload.message, payload.details];
            let naming_key = texts
                .iter()
                .flatten()
                .find(|text| text.contains(IDEMPOTENCY_KEY_COLUMN))
                .cloned();
            naming_key.or_else(|| texts.into_iter().flatten().next())
        })
        .map(|message| compact_text(&message))
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            let trimmed = compact_text(body);
            if trimmed.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                trimmed
            }
        });

    RemoteError::new(code, message)
}

fn server_id_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn millis_to_datetime(millis: i64) -> std::result::Result<DateTime<Utc>, RemoteError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| RemoteError::transport(format!("timestamp {millis} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn record_json(id: usize) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "idempotency_key": format!("tok-{id}"),
            "user_id": "u1",
            "tenant_id": "t1",
            "created_at": format!("2024-05-01T12:00:{id:02}+00:00"),
            "kind": "scan",
            "payload": format!("row {id}"),
            "metadata": null
        })
    }

    fn offset_param(request: &str) -> usize {
        request
            .split(['?', '&', ' '])
            .find_map(|part| part.strip_prefix("offset="))
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    /// Serves `total` rows newest first, at most `max_rows` per response,
    /// and records the offset of every request.
    async fn spawn_paged_server(
        total: usize,
        max_rows: usize,
    ) -> (String, Arc<Mutex<Vec<usize>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let offsets = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&offsets);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buffer = [0_u8; 1024];
                while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                    match socket.read(&mut buffer).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buffer[..read]),
                    }
                }
                let offset = offset_param(&String::from_utf8_lossy(&request));
                seen.lock().unwrap().push(offset);

                let rows = (0..total)
                    .rev()
                    .skip(offset)
                    .take(max_rows)
                    .map(record_json)
                    .collect::<Vec<_>>();
                let body = serde_json::to_string(&rows).unwrap();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (format!("http://{address}"), offsets)
    }

    #[test]
    fn parse_api_error_reads_postgres_code() {
        let body = r#"{"code":"23505","details":null,"hint":null,"message":"duplicate key value violates unique constraint \"scan_records_idempotency_key_key\""}"#;
        let error = parse_api_error(StatusCode::CONFLICT, body);
        assert!(error.is_unique_violation());
        assert!(error.message.contains("duplicate key"));
    }

    #[test]
    fn parse_api_error_reads_column_from_details() {
        let body = r#"{"code":"23505","details":"Key (idempotency_key)=(tok-1) already exists.","hint":null,"message":"duplicate key value violates unique constraint \"records_token_uq\""}"#;
        let error = parse_api_error(StatusCode::CONFLICT, body);
        assert!(error.is_unique_violation());
        assert!(error.message.contains("tok-1"));
    }

    #[test]
    fn parse_api_error_other_unique_constraint_is_not_duplicate() {
        let body = r#"{"code":"23505","details":"Key (user_id, payload)=(u1, X) already exists.","hint":null,"message":"duplicate key value violates unique constraint \"scan_records_user_payload_key\""}"#;
        let error = parse_api_error(StatusCode::CONFLICT, body);
        assert_eq!(error.code, "23505");
        assert!(!error.is_unique_violation());
    }

    #[test]
    fn parse_api_error_conflict_without_code_is_not_duplicate() {
        let error = parse_api_error(StatusCode::CONFLICT, "");
        assert_eq!(error.code, "http_409");
        assert_eq!(error.message, "HTTP 409");
        assert!(!error.is_unique_violation());

        let error = parse_api_error(StatusCode::CONFLICT, "<html>409 Conflict</html>");
        assert_eq!(error.code, "http_409");
        assert!(!error.is_unique_violation());
    }

    #[test]
    fn parse_api_error_keeps_other_statuses_distinct() {
        let error = parse_api_error(StatusCode::UNAUTHORIZED, "JWT expired");
        assert_eq!(error.code, "http_401");
        assert_eq!(error.message, "JWT expired");
        assert!(!error.is_unique_violation());
    }

    #[test]
    fn record_row_maps_numeric_ids_and_timestamps() {
        let payload = r#"{
            "id": 42,
            "idempotency_key": "tok-1",
            "user_id": "u1",
            "tenant_id": 7,
            "created_at": "2024-05-01T12:00:00.250+00:00",
            "kind": "generate",
            "payload": "WIFI:S:home;;",
            "metadata": null
        }"#;
        let row: RecordRow = serde_json::from_str(payload).unwrap();
        let record = RemoteRecord::try_from(row).unwrap();

        assert_eq!(record.server_id, "42");
        assert_eq!(record.tenant_id.as_deref(), Some("7"));
        assert_eq!(record.created_at, 1_714_564_800_250);
        assert_eq!(record.kind, RecordKind::Generate);
        assert_eq!(record.metadata, None);
    }

    #[test]
    fn insert_row_serializes_wire_names() {
        let insert = RemoteInsert {
            idempotency_token: "tok-1".to_string(),
            user_id: "u1".to_string(),
            tenant_id: "t1".to_string(),
            created_at: 0,
            kind: RecordKind::Scan,
            payload: "X".to_string(),
            metadata: None,
        };
        let row = InsertRow::try_from(&insert).unwrap();
        let json = serde_json::to_value(&row).unwrap();

        assert_eq!(json["idempotency_key"], "tok-1");
        assert_eq!(json["kind"], "scan");
        assert_eq!(json["created_at"], "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn new_store_builds_table_urls() {
        let config = RemoteConfig::new("https://project.supabase.co/", "anon").unwrap();
        let store = SupabaseRecordStore::new(config).unwrap();
        assert_eq!(
            store.table_url("scan_records"),
            "https://project.supabase.co/rest/v1/scan_records"
        );
    }

    #[tokio::test]
    async fn query_pages_until_the_server_runs_out_of_rows() {
        let (url, offsets) = spawn_paged_server(5, 2).await;
        let config = RemoteConfig::new(&url, "anon").unwrap();
        let store = SupabaseRecordStore::new(config).unwrap().with_page_size(3);

        let records = store
            .query(
                &AuthSession::new("token", "u1"),
                &RecordQuery {
                    since: 0,
                    owner: "u1".to_string(),
                },
            )
            .await
            .unwrap();

        let ids = records
            .iter()
            .map(|record| record.server_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["4", "3", "2", "1", "0"]);
        assert_eq!(*offsets.lock().unwrap(), vec![0, 2, 4, 5]);
    }
}
