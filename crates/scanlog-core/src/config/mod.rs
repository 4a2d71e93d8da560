//! Remote store configuration.
//!
//! A `RemoteConfig` names the PostgREST endpoint (as exposed by Supabase) that
//! holds the shared record table, plus the public key and table names the
//! sync engine needs. It can come from a JSON file or from environment
//! variables; both paths go through the same validation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_RECORDS_TABLE: &str = "scan_records";
const DEFAULT_MEMBERSHIPS_TABLE: &str = "memberships";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

pub const ENV_SUPABASE_URL: &str = "SCANLOG_SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "SCANLOG_SUPABASE_ANON_KEY";
pub const ENV_RECORDS_TABLE: &str = "SCANLOG_RECORDS_TABLE";
pub const ENV_MEMBERSHIPS_TABLE: &str = "SCANLOG_MEMBERSHIPS_TABLE";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "SCANLOG_HTTP_TIMEOUT_SECS";

/// Safe-to-ship remote endpoint configuration.
///
/// Secret credentials never belong here; the per-user access token comes from
/// the session provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    #[serde(default = "default_records_table")]
    pub records_table: String,
    #[serde(default = "default_memberships_table")]
    pub memberships_table: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_records_table() -> String {
    DEFAULT_RECORDS_TABLE.to_string()
}

fn default_memberships_table() -> String {
    DEFAULT_MEMBERSHIPS_TABLE.to_string()
}

const fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl RemoteConfig {
    pub fn new(
        supabase_url: impl Into<String>,
        supabase_anon_key: impl Into<String>,
    ) -> Result<Self> {
        Self {
            supabase_url: supabase_url.into(),
            supabase_anon_key: supabase_anon_key.into(),
            records_table: default_records_table(),
            memberships_table: default_memberships_table(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
        .normalized()
    }

    /// Parse a config from a raw JSON payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid remote config JSON: {error}")))?;
        config.normalized()
    }

    /// Load a config file from disk.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            Error::Config(format!("failed to read config at {}: {error}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Resolve a config from an environment lookup.
    ///
    /// Returns `Ok(None)` when neither URL nor key is set, and an error when
    /// only one of them is.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let url = normalize_text_option(lookup(ENV_SUPABASE_URL));
        let anon_key = normalize_text_option(lookup(ENV_SUPABASE_ANON_KEY));

        let (url, anon_key) = match (url, anon_key) {
            (None, None) => return Ok(None),
            (Some(url), Some(anon_key)) => (url, anon_key),
            _ => {
                return Err(Error::Config(format!(
                    "{ENV_SUPABASE_URL} and {ENV_SUPABASE_ANON_KEY} must be set together"
                )))
            }
        };

        let http_timeout_secs = match normalize_text_option(lookup(ENV_HTTP_TIMEOUT_SECS)) {
            Some(raw) => raw.parse().map_err(|_| {
                Error::Config(format!("{ENV_HTTP_TIMEOUT_SECS} must be a whole number of seconds"))
            })?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Self {
            supabase_url: url,
            supabase_anon_key: anon_key,
            records_table: normalize_text_option(lookup(ENV_RECORDS_TABLE))
                .unwrap_or_else(default_records_table),
            memberships_table: normalize_text_option(lookup(ENV_MEMBERSHIPS_TABLE))
                .unwrap_or_else(default_memberships_table),
            http_timeout_secs,
        }
        .normalized()
        .map(Some)
    }

    /// Resolve a config from the process environment.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Base URL of the PostgREST API.
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.supabase_url)
    }

    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    fn normalized(self) -> Result<Self> {
        let supabase_url = normalize_required_http_url(self.supabase_url, "supabase_url")?;
        let supabase_anon_key =
            normalize_required_value(self.supabase_anon_key, "supabase_anon_key")?;
        let records_table = normalize_table_name(self.records_table, "records_table")?;
        let memberships_table = normalize_table_name(self.memberships_table, "memberships_table")?;
        if self.http_timeout_secs == 0 {
            return Err(Error::Config(
                "http_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            supabase_url,
            supabase_anon_key,
            records_table,
            memberships_table,
            http_timeout_secs: self.http_timeout_secs,
        })
    }
}

fn normalize_required_value(raw: String, field: &str) -> Result<String> {
    normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config(format!("config field '{field}' is required")))
}

fn normalize_required_http_url(raw: String, field: &str) -> Result<String> {
    let value = normalize_required_value(raw, field)?;
    if !is_http_url(&value) {
        return Err(Error::Config(format!(
            "config field '{field}' must include http:// or https://"
        )));
    }
    let value = value.trim_end_matches('/');
    Ok(value.strip_suffix("/rest/v1").unwrap_or(value).to_string())
}

fn normalize_table_name(raw: String, field: &str) -> Result<String> {
    let value = normalize_required_value(raw, field)?;
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(value)
    } else {
        Err(Error::Config(format!(
            "config field '{field}' may only contain letters, digits and '_'"
        )))
    }
}
