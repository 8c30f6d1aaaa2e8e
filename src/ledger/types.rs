//! Canonical ledger event shape produced by the normalizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Symbol used for the chain's native coin
pub const NATIVE_SYMBOL: &str = "TON";

/// Decimals assumed when upstream omits them (nanotons)
pub const DEFAULT_DECIMALS: u8 = 9;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parties {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// One asset movement carried by an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLine {
    pub asset_symbol: String,
    pub raw_amount: u128,
    pub decimals: u8,
}

impl AssetLine {
    pub fn native(raw_amount: u128) -> Self {
        Self {
            asset_symbol: NATIVE_SYMBOL.to_string(),
            raw_amount,
            decimals: DEFAULT_DECIMALS,
        }
    }

    /// Exact decimal rendering with trailing zeros trimmed
    pub fn display_amount(&self) -> String {
        format_units(self.raw_amount, self.decimals)
    }
}

/// Render `raw / 10^decimals` without going through floating point.
///
/// `1_500_000_000` with 9 decimals renders as `1.5`; whole numbers drop the point.
pub fn format_units(raw: u128, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }
    let scale = 10u128.pow(decimals as u32);
    let whole = raw / scale;
    let frac = raw % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

/// A single entry of an address's transaction history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: String,
    /// Logical time. Events sharing a key are the same event.
    pub order_key: Option<u64>,
    pub parties: Parties,
    pub lines: Vec<AssetLine>,
    pub observed_at: Option<DateTime<Utc>>,
    pub fee: Option<u128>,
    pub memo: Option<String>,
}

impl LedgerEvent {
    pub fn new(id: impl Into<String>, order_key: Option<u64>) -> Self {
        Self {
            id: id.into(),
            order_key,
            parties: Parties::default(),
            lines: Vec::new(),
            observed_at: None,
            fee: None,
            memo: None,
        }
    }
}
