//! Ledger side of the watcher: upstream adapter and record normalization
//!
//! ```text
//! LedgerSource::fetch_recent → Vec<serde_json::Value>
//!     ↓
//! normalizer::normalize_batch → Vec<LedgerEvent> (+ skipped count)
//! ```

pub mod normalizer;
pub mod toncenter;
pub mod types;

pub use normalizer::{normalize, normalize_batch, NormalizeError, NormalizedBatch};
pub use toncenter::{FetchError, LedgerSource, ToncenterClient};
pub use types::{AssetLine, LedgerEvent, Parties};
