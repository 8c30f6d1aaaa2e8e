//! Runtime configuration
//!
//! Sources, later wins:
//! 1. built-in defaults
//! 2. JSON config file (`WATCHER_CONFIG`, default `config.json` when present)
//! 3. environment variables (`.env` is loaded by the binary)
//!
//! Config file keys: `telegram_token`, `ton_api_key`, `poll_interval`
//! (seconds, may be fractional), `storage_file`.

use crate::delivery::DeliveryPolicy;
use crate::ledger::toncenter::DEFAULT_TONCENTER_URL;
use crate::watcher::PollerConfig;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
    File(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
            ConfigError::File(msg) => write!(f, "Config file error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackendKind {
    Sqlite,
    Json,
}

impl StateBackendKind {
    fn default_path(&self) -> &'static str {
        match self {
            StateBackendKind::Sqlite => "tonflow.db",
            StateBackendKind::Json => "state.json",
        }
    }
}

/// Keys accepted in the JSON config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub telegram_token: Option<String>,
    pub ton_api_key: Option<String>,
    /// Seconds
    pub poll_interval: Option<f64>,
    pub storage_file: Option<String>,
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Telegram bot token; without one notifications only go to the log
    pub telegram_token: Option<String>,
    pub ton_api_key: Option<String>,
    pub toncenter_url: String,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub fetch_limit: usize,
    pub delivery_timeout: Duration,
    pub delivery_policy: DeliveryPolicy,
    pub dead_letter_path: Option<String>,
    pub state_backend: StateBackendKind,
    pub state_path: String,
    /// `(subscriber_id, address)` pairs registered at startup if missing
    pub seed_subscriptions: Vec<(String, String)>,
    pub rust_log: String,
}

impl WatcherConfig {
    /// Load configuration from the config file and environment variables
    ///
    /// Environment variables:
    /// - `WATCHER_CONFIG` (default: config.json, skipped if absent)
    /// - `TELEGRAM_TOKEN`, `TON_API_KEY` (default: none)
    /// - `TONCENTER_URL` (default: https://toncenter.com/api/v2)
    /// - `POLL_INTERVAL_MS` (default: 8000)
    /// - `FETCH_TIMEOUT_MS` (default: 20000)
    /// - `FETCH_LIMIT` (default: 20)
    /// - `DELIVERY_TIMEOUT_MS` (default: 10000)
    /// - `DELIVERY_POLICY` fire_and_forget | retry (default: fire_and_forget)
    /// - `DELIVERY_MAX_ATTEMPTS` (default: 3)
    /// - `DELIVERY_INITIAL_BACKOFF_MS` (default: 1000)
    /// - `DELIVERY_MAX_BACKOFF_MS` (default: 30000)
    /// - `DEAD_LETTER_PATH` (default: none)
    /// - `STATE_BACKEND` sqlite | json (default: sqlite)
    /// - `STATE_PATH` (default: tonflow.db or state.json)
    /// - `SEED_SUBSCRIPTIONS` comma-separated `chat:address` (default: none)
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match env::var("WATCHER_CONFIG") {
            Ok(path) => Some(FileConfig::load(path)?),
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => Some(FileConfig::load(DEFAULT_CONFIG_FILE)?),
            Err(_) => None,
        };
        Self::resolve(file.unwrap_or_default(), |key| env::var(key).ok())
    }

    /// Merge file values with variables from `lookup`
    pub fn resolve(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_token = var("TELEGRAM_TOKEN").or(file.telegram_token);
        let ton_api_key = var("TON_API_KEY").or(file.ton_api_key);

        let toncenter_url = var("TONCENTER_URL").unwrap_or_else(|| DEFAULT_TONCENTER_URL.to_string());
        if !toncenter_url.starts_with("http://") && !toncenter_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "TONCENTER_URL must start with http:// or https://".to_string(),
            ));
        }

        let poll_interval = match var("POLL_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(parse_number("POLL_INTERVAL_MS", &raw)?),
            None => match file.poll_interval {
                Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
                Some(secs) => {
                    return Err(ConfigError::InvalidValue(format!(
                        "poll_interval must be positive, got {}",
                        secs
                    )))
                }
                None => Duration::from_millis(8_000),
            },
        };
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue("POLL_INTERVAL_MS must be greater than 0".to_string()));
        }

        let fetch_timeout = Duration::from_millis(number_or(&var, "FETCH_TIMEOUT_MS", 20_000)?);
        let fetch_limit = number_or(&var, "FETCH_LIMIT", 20)? as usize;
        if fetch_limit == 0 {
            return Err(ConfigError::InvalidValue("FETCH_LIMIT must be greater than 0".to_string()));
        }
        let delivery_timeout = Duration::from_millis(number_or(&var, "DELIVERY_TIMEOUT_MS", 10_000)?);

        let delivery_policy = match var("DELIVERY_POLICY").map(|p| p.to_lowercase()).as_deref() {
            None | Some("fire_and_forget") => DeliveryPolicy::FireAndForget,
            Some("retry") => DeliveryPolicy::Retry {
                max_attempts: number_or(&var, "DELIVERY_MAX_ATTEMPTS", 3)? as u32,
                initial_backoff: Duration::from_millis(number_or(&var, "DELIVERY_INITIAL_BACKOFF_MS", 1_000)?),
                max_backoff: Duration::from_millis(number_or(&var, "DELIVERY_MAX_BACKOFF_MS", 30_000)?),
            },
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "DELIVERY_POLICY must be fire_and_forget or retry, got {:?}",
                    other
                )))
            }
        };

        // A legacy storage_file is the JSON state format
        let state_backend = match var("STATE_BACKEND").map(|b| b.to_lowercase()).as_deref() {
            Some("sqlite") => StateBackendKind::Sqlite,
            Some("json") => StateBackendKind::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "STATE_BACKEND must be sqlite or json, got {:?}",
                    other
                )))
            }
            None if file.storage_file.is_some() => StateBackendKind::Json,
            None => StateBackendKind::Sqlite,
        };
        let state_path = var("STATE_PATH")
            .or(file.storage_file)
            .unwrap_or_else(|| state_backend.default_path().to_string());

        let seed_subscriptions = match var("SEED_SUBSCRIPTIONS") {
            Some(raw) => parse_seeds(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            telegram_token,
            ton_api_key,
            toncenter_url,
            poll_interval,
            fetch_timeout,
            fetch_limit,
            delivery_timeout,
            delivery_policy,
            dead_letter_path: var("DEAD_LETTER_PATH"),
            state_backend,
            state_path,
            seed_subscriptions,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            fetch_timeout: self.fetch_timeout,
            fetch_limit: self.fetch_limit,
            start_jitter: true,
        }
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue(format!("{} must be a non-negative integer, got {:?}", key, raw)))
}

fn number_or(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match var(key) {
        Some(raw) => parse_number(key, &raw),
        None => Ok(default),
    }
}

/// `chat:address,chat:address`; raw addresses contain a colon, so split on the first one only
fn parse_seeds(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((chat, address)) if !chat.trim().is_empty() && !address.trim().is_empty() => {
                Ok((chat.trim().to_string(), address.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidValue(format!(
                "SEED_SUBSCRIPTIONS entry {:?} is not chat:address",
                entry
            ))),
        })
        .collect()
}
