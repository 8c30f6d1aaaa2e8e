//! Record normalization from raw upstream JSON to `LedgerEvent`
//!
//! The upstream transaction API is not schema-stable: the same fact can live
//! under different keys (or nesting levels) depending on API version and
//! transaction kind. Every alternative we accept is listed in the probe
//! tables below, highest priority first. Anything not listed is ignored.
//!
//! Normalization is pure. Errors are returned as values so the caller decides
//! whether to skip the record or abort.

use crate::ledger::types::{AssetLine, LedgerEvent, Parties, DEFAULT_DECIMALS, NATIVE_SYMBOL};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Ordering key locations on the record itself
const ORDER_KEY_PROBES: &[&[&str]] = &[
    &["lt"],
    &["transaction_id", "lt"],
    &["in_msg", "created_lt"],
    &["in_msg", "lt"],
];

/// Ordering key fields inside an out message (last-resort probe)
const MESSAGE_LT_FIELDS: &[&str] = &["created_lt", "lt"];

const ID_PROBES: &[&[&str]] = &[&["hash"], &["transaction_id", "hash"], &["in_msg", "hash"]];

const SOURCE_FIELDS: &[&str] = &["source", "src", "from"];
const DESTINATION_FIELDS: &[&str] = &["destination", "dst", "to"];
const AMOUNT_FIELDS: &[&str] = &["value", "amount", "balance"];
const TOKEN_AMOUNT_FIELDS: &[&str] = &["amount", "balance", "value"];
const TOKEN_ARRAY_FIELDS: &[&str] = &["jettons", "token_transfers", "tokens"];
const TOKEN_SYMBOL_FIELDS: &[&str] = &["symbol", "jetton_symbol", "ticker"];
const TIME_FIELDS: &[&str] = &["utime", "now", "timestamp"];
const FEE_FIELDS: &[&str] = &["fee", "total_fees"];
const MEMO_FIELDS: &[&str] = &["message", "comment"];

/// Largest decimals value whose scale still fits in a u128
const MAX_DECIMALS: u64 = 38;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    NotAnObject,
    MissingOrderKey,
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizeError::NotAnObject => write!(f, "record is not a JSON object"),
            NormalizeError::MissingOrderKey => write!(f, "no ordering key in any known field"),
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Result of normalizing one fetched snapshot
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub events: Vec<LedgerEvent>,
    pub skipped: usize,
}

/// Normalize a single upstream record
pub fn normalize(record: &Value) -> Result<LedgerEvent, NormalizeError> {
    if !record.is_object() {
        return Err(NormalizeError::NotAnObject);
    }

    let order_key = probe_order_key(record).ok_or(NormalizeError::MissingOrderKey)?;

    let id = ID_PROBES
        .iter()
        .find_map(|path| lookup(record, path).and_then(as_address_like))
        .unwrap_or_else(|| order_key.to_string());

    let in_msg = record.get("in_msg").filter(|m| m.is_object());
    let in_value = in_msg
        .and_then(|m| probe_fields(m, AMOUNT_FIELDS, as_u128))
        .filter(|v| *v > 0);

    // Incoming value wins; otherwise an outgoing transfer describes the event
    let (message, native_amount) = match (in_value, first_out_msg(record)) {
        (Some(value), _) => (in_msg, Some(value)),
        (None, Some(out)) => (
            Some(out),
            probe_fields(out, AMOUNT_FIELDS, as_u128).filter(|v| *v > 0),
        ),
        (None, None) => (in_msg, None),
    };

    let parties = message
        .map(|m| Parties {
            from: probe_fields(m, SOURCE_FIELDS, as_address_like),
            to: probe_fields(m, DESTINATION_FIELDS, as_address_like),
        })
        .unwrap_or_default();

    let mut lines = Vec::new();
    if let Some(raw) = native_amount {
        lines.push(AssetLine::native(raw));
    }
    lines.extend(token_lines(record));

    Ok(LedgerEvent {
        id,
        order_key: Some(order_key),
        parties,
        lines,
        observed_at: probe_fields(record, TIME_FIELDS, as_timestamp),
        fee: probe_fields(record, FEE_FIELDS, as_u128),
        memo: in_msg.and_then(|m| probe_fields(m, MEMO_FIELDS, as_text)),
    })
}

/// Normalize a snapshot, skipping (and logging) records that fail
pub fn normalize_batch(records: &[Value]) -> NormalizedBatch {
    let mut batch = NormalizedBatch {
        events: Vec::with_capacity(records.len()),
        skipped: 0,
    };

    for (idx, record) in records.iter().enumerate() {
        match normalize(record) {
            Ok(event) => batch.events.push(event),
            Err(e) => {
                log::warn!("⚠️  Skipping upstream record #{}: {}", idx, e);
                batch.skipped += 1;
            }
        }
    }

    batch
}

fn probe_order_key(record: &Value) -> Option<u64> {
    ORDER_KEY_PROBES
        .iter()
        .find_map(|path| lookup(record, path).and_then(as_u64))
        .or_else(|| first_out_msg(record).and_then(|m| probe_fields(m, MESSAGE_LT_FIELDS, as_u64)))
}

fn first_out_msg(record: &Value) -> Option<&Value> {
    record
        .get("out_msgs")
        .and_then(Value::as_array)
        .and_then(|msgs| msgs.first())
        .filter(|m| m.is_object())
}

fn token_lines(record: &Value) -> Vec<AssetLine> {
    let mut lines = Vec::new();

    for field in TOKEN_ARRAY_FIELDS {
        let Some(items) = record.get(*field).and_then(Value::as_array) else {
            continue;
        };
        for item in items.iter().filter(|i| i.is_object()) {
            let Some(raw_amount) = probe_fields(item, TOKEN_AMOUNT_FIELDS, as_u128) else {
                continue;
            };
            let jetton = item.get("jetton");
            let asset_symbol = probe_fields(item, TOKEN_SYMBOL_FIELDS, as_text)
                .or_else(|| jetton.and_then(|j| probe_fields(j, TOKEN_SYMBOL_FIELDS, as_text)))
                .unwrap_or_else(|| "UNKNOWN".to_string());
            let decimals = item
                .get("decimals")
                .or_else(|| jetton.and_then(|j| j.get("decimals")))
                .and_then(as_u64)
                .filter(|d| *d <= MAX_DECIMALS)
                .map(|d| d as u8)
                .unwrap_or(DEFAULT_DECIMALS);

            // A token entry that only restates the native coin is not a token line
            if asset_symbol == NATIVE_SYMBOL {
                continue;
            }

            lines.push(AssetLine {
                asset_symbol,
                raw_amount,
                decimals,
            });
        }
    }

    lines
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

fn probe_fields<T>(value: &Value, fields: &[&str], parse: impl Fn(&Value) -> Option<T>) -> Option<T> {
    fields.iter().find_map(|f| value.get(*f).and_then(&parse))
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u128(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    DateTime::from_timestamp(secs, 0)
}

fn as_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Addresses and hashes arrive as bare strings or wrapped in an object
fn as_address_like(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => as_text(value),
        Value::Object(_) => value
            .get("account_address")
            .or_else(|| value.get("address"))
            .and_then(as_text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn toncenter_record(lt: &str) -> Value {
        json!({
            "@type": "raw.transaction",
            "utime": 1700000000,
            "data": "te6cck...",
            "transaction_id": {
                "@type": "internal.transactionId",
                "lt": lt,
                "hash": format!("hash-{}", lt)
            },
            "fee": "1123456",
            "storage_fee": "12",
            "in_msg": {
                "source": "EQSourceAddress",
                "destination": "EQWatchedAddress",
                "value": "1500000000",
                "created_lt": lt,
                "message": "thanks"
            },
            "out_msgs": []
        })
    }

    #[test]
    fn test_normalize_toncenter_record() {
        let event = normalize(&toncenter_record("4200")).unwrap();

        assert_eq!(event.order_key, Some(4200));
        assert_eq!(event.id, "hash-4200");
        assert_eq!(event.parties.from.as_deref(), Some("EQSourceAddress"));
        assert_eq!(event.parties.to.as_deref(), Some("EQWatchedAddress"));
        assert_eq!(event.lines, vec![AssetLine::native(1_500_000_000)]);
        assert_eq!(event.fee, Some(1_123_456));
        assert_eq!(event.memo.as_deref(), Some("thanks"));
        assert_eq!(event.observed_at.unwrap().timestamp(), 1700000000);
    }

    #[test]
    fn test_top_level_lt_takes_priority() {
        let mut record = toncenter_record("10");
        record["lt"] = json!(99);

        let event = normalize(&record).unwrap();
        assert_eq!(event.order_key, Some(99));
    }

    #[test]
    fn test_order_key_from_in_msg_only() {
        let record = json!({
            "in_msg": { "lt": "777", "source": "", "destination": "EQDest" }
        });

        let event = normalize(&record).unwrap();
        assert_eq!(event.order_key, Some(777));
        // No explicit hash anywhere: id falls back to the order key
        assert_eq!(event.id, "777");
        // Empty source (external message) is unknown, not ""
        assert_eq!(event.parties.from, None);
        assert!(event.lines.is_empty());
    }

    #[test]
    fn test_order_key_from_out_msgs() {
        let record = json!({
            "hash": "abc",
            "in_msg": { "source": "", "value": "0" },
            "out_msgs": [
                { "created_lt": 555, "source": "EQWatched", "destination": "EQPeer", "value": 2000000000u64 }
            ]
        });

        let event = normalize(&record).unwrap();
        assert_eq!(event.order_key, Some(555));
        assert_eq!(event.id, "abc");
        assert_eq!(event.parties.from.as_deref(), Some("EQWatched"));
        assert_eq!(event.parties.to.as_deref(), Some("EQPeer"));
        assert_eq!(event.lines, vec![AssetLine::native(2_000_000_000)]);
    }

    #[test]
    fn test_missing_order_key() {
        let record = json!({ "hash": "x", "in_msg": { "source": "a" } });
        assert_eq!(normalize(&record), Err(NormalizeError::MissingOrderKey));

        // Non-numeric lt is as good as missing
        let record = json!({ "lt": "not-a-number" });
        assert_eq!(normalize(&record), Err(NormalizeError::MissingOrderKey));
    }

    #[test]
    fn test_not_an_object() {
        assert_eq!(normalize(&json!([1, 2])), Err(NormalizeError::NotAnObject));
        assert_eq!(normalize(&json!(null)), Err(NormalizeError::NotAnObject));
    }

    #[test]
    fn test_address_objects_and_alternate_names() {
        let record = json!({
            "lt": 1,
            "in_msg": {
                "src": { "account_address": "EQFromObj" },
                "dst": { "address": "EQToObj" },
                "amount": 5
            }
        });

        let event = normalize(&record).unwrap();
        assert_eq!(event.parties.from.as_deref(), Some("EQFromObj"));
        assert_eq!(event.parties.to.as_deref(), Some("EQToObj"));
        assert_eq!(event.lines[0].raw_amount, 5);
    }

    #[test]
    fn test_token_lines() {
        let record = json!({
            "lt": 8,
            "jettons": [
                { "symbol": "USDT", "amount": "2500000", "decimals": 6 },
                { "jetton": { "symbol": "NOT", "decimals": "9" }, "balance": "1000000000" },
                { "amount": "42" },
                { "symbol": "BROKEN" }
            ],
            "unexpected": { "deeply": ["nested", 1] }
        });

        let event = normalize(&record).unwrap();
        assert_eq!(event.lines.len(), 3);
        assert_eq!(event.lines[0].asset_symbol, "USDT");
        assert_eq!(event.lines[0].display_amount(), "2.5");
        assert_eq!(event.lines[1].asset_symbol, "NOT");
        assert_eq!(event.lines[1].display_amount(), "1");
        // Missing decimals default to 9
        assert_eq!(event.lines[2].asset_symbol, "UNKNOWN");
        assert_eq!(event.lines[2].decimals, 9);
    }

    #[test]
    fn test_batch_with_one_malformed_record() {
        let mut records: Vec<Value> = (1..=9).map(|i| toncenter_record(&i.to_string())).collect();
        records.insert(4, json!({ "hash": "orphan", "in_msg": {} }));

        let batch = normalize_batch(&records);
        assert_eq!(batch.events.len(), 9);
        assert_eq!(batch.skipped, 1);
        assert!(batch.events.iter().all(|e| e.order_key.is_some()));
    }
}
