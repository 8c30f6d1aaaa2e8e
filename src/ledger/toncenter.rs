//! Toncenter v2 HTTP adapter
//!
//! Endpoint: `{base}/getTransactions?address={address}&limit={limit}`
//! Returns: `{"ok": true, "result": [ ...raw transactions... ]}`
//!
//! The adapter only fetches and unwraps the envelope. Records are handed to
//! the normalizer untouched.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_TONCENTER_URL: &str = "https://toncenter.com/api/v2";

#[derive(Debug)]
pub enum FetchError {
    Http(reqwest::Error),
    Status(u16),
    Decode(String),
    Api(String),
    Timeout(Duration),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(Duration::ZERO)
        } else {
            FetchError::Http(err)
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Http(e) => write!(f, "HTTP error: {}", e),
            FetchError::Status(code) => write!(f, "upstream returned status {}", code),
            FetchError::Decode(msg) => write!(f, "undecodable response body: {}", msg),
            FetchError::Api(msg) => write!(f, "upstream reported error: {}", msg),
            FetchError::Timeout(d) if d.is_zero() => write!(f, "request timed out"),
            FetchError::Timeout(d) => write!(f, "request timed out after {}ms", d.as_millis()),
        }
    }
}

impl std::error::Error for FetchError {}

/// Source of recent ledger records for an address
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Fetch up to `limit` of the most recent raw records for `address`
    async fn fetch_recent(&self, address: &str, limit: usize) -> Result<Vec<Value>, FetchError>;

    /// Source name for logging
    fn source_name(&self) -> &'static str;
}

pub struct ToncenterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ToncenterClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl LedgerSource for ToncenterClient {
    async fn fetch_recent(&self, address: &str, limit: usize) -> Result<Vec<Value>, FetchError> {
        let url = format!("{}/getTransactions", self.base_url);
        let limit = limit.to_string();

        let mut request = self
            .http
            .get(&url)
            .query(&[("address", address), ("limit", limit.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_envelope(&body)
    }

    fn source_name(&self) -> &'static str {
        "toncenter"
    }
}

/// Unwrap the response envelope into raw records
///
/// Accepted shapes:
/// - `{"ok": true, "result": [...]}` (v2)
/// - `{"transactions": [...]}` (v3 style)
/// - a bare array
///
/// A well-formed envelope with no records yields an empty vec.
pub fn parse_envelope(body: &str) -> Result<Vec<Value>, FetchError> {
    let value: Value = serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    match value {
        Value::Array(records) => Ok(records),
        Value::Object(map) => {
            if map.get("ok").and_then(Value::as_bool) == Some(false) {
                let msg = map
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified error")
                    .to_string();
                return Err(FetchError::Api(msg));
            }

            let records = map
                .get("result")
                .or_else(|| map.get("transactions"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(records)
        }
        other => Err(FetchError::Decode(format!("unexpected top-level JSON: {}", other))),
    }
}
