//! New-event detection against a per-subscription watermark
//!
//! # Rules
//! - Events without an ordering key cannot be placed and are discarded
//! - Unset watermark: baseline only, nothing is delivered, next = max key
//! - Otherwise: keys strictly above the watermark, ascending, ties broken
//!   by id, one event per key
//! - The watermark never moves backward

use crate::ledger::LedgerEvent;

/// Outcome of comparing one snapshot against a watermark
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    pub new_events: Vec<LedgerEvent>,
    pub next_watermark: Option<u64>,
    /// Events dropped for lacking an ordering key
    pub discarded: usize,
    /// True when this call established the first watermark
    pub baselined: bool,
}

pub fn detect(events: Vec<LedgerEvent>, watermark: Option<u64>) -> Detection {
    let mut discarded = 0;
    let mut keyed: Vec<(u64, LedgerEvent)> = Vec::with_capacity(events.len());

    for event in events {
        match event.order_key {
            Some(key) => keyed.push((key, event)),
            None => {
                log::warn!("⚠️  Discarding event {} without ordering key", event.id);
                discarded += 1;
            }
        }
    }

    let batch_max = keyed.iter().map(|(key, _)| *key).max();

    let Some(current) = watermark else {
        return Detection {
            new_events: Vec::new(),
            next_watermark: batch_max,
            discarded,
            baselined: batch_max.is_some(),
        };
    };

    let mut fresh: Vec<(u64, LedgerEvent)> = keyed.into_iter().filter(|(key, _)| *key > current).collect();
    fresh.sort_by(|(ka, a), (kb, b)| ka.cmp(kb).then_with(|| a.id.cmp(&b.id)));
    fresh.dedup_by_key(|(key, _)| *key);

    let next_watermark = if fresh.is_empty() {
        Some(current)
    } else {
        // Every fresh key exceeds `current`, so the batch max does too
        batch_max.map(|max| max.max(current))
    };

    Detection {
        new_events: fresh.into_iter().map(|(_, event)| event).collect(),
        next_watermark,
        discarded,
        baselined: false,
    }
}
