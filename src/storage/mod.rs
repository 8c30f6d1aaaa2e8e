//! Durable subscription state
//!
//! One logical record per subscriber:
//! `subscriber_id → {resource_address, enabled, generation, watermark}`
//!
//! Column ownership is split: the registry writes address/enabled/generation
//! through `save_subscription`, the cursor store writes the watermark through
//! `save_watermark`. A watermark is only meaningful for the generation it was
//! saved under; loaders drop watermarks whose generation is stale.

pub mod json_backend;
pub mod sqlite_backend;

pub use json_backend::JsonFileStateBackend;
pub use sqlite_backend::SqliteStateBackend;

use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Corrupt(e) => write!(f, "Corrupt state: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Registry-owned columns of a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub subscriber_id: String,
    pub resource_address: String,
    pub enabled: bool,
    pub generation: u64,
}

/// Full persisted state of one subscription as read at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSubscription {
    pub record: SubscriptionRecord,
    pub watermark: Option<u64>,
}

/// Storage backend for subscription state
///
/// Implementations are synchronous: every call is a short local write and
/// is never made while holding an async lock.
pub trait StateBackend: Send + Sync {
    /// Read every persisted subscription
    fn load_all(&self) -> Result<Vec<PersistedSubscription>, StoreError>;

    /// Insert or update the registry-owned columns
    fn save_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError>;

    /// Replace the watermark stored for `generation` of a subscription
    fn save_watermark(
        &self,
        subscriber_id: &str,
        generation: u64,
        watermark: Option<u64>,
    ) -> Result<(), StoreError>;

    /// Forget a subscription entirely
    fn remove(&self, subscriber_id: &str) -> Result<(), StoreError>;

    /// Backend type for logging
    fn backend_type(&self) -> &'static str;
}
