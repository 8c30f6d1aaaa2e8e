//! Per-subscription watermark store
//!
//! Each subscription owns one `CursorSlot` behind its own mutex, so writes to
//! one subscription's watermark are serialized while different subscriptions
//! never contend. The outer map lock is held only to look up or insert a slot.
//!
//! Persistence is best-effort:
//! - if the initial load failed, the whole store is memory-only for the
//!   process lifetime
//! - if a write fails, only that subscription stops persisting
//! Either way each subscription logs its degradation once.

use crate::storage::{PersistedSubscription, StateBackend};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    /// Attempt to move a watermark backward
    Regression { current: u64, attempted: u64 },
    /// The cursor was reset for a newer resource generation
    StaleGeneration { current: u64, attempted: u64 },
    UnknownSubscription(String),
}

impl std::fmt::Display for CursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CursorError::Regression { current, attempted } => {
                write!(f, "watermark regression: {} -> {}", current, attempted)
            }
            CursorError::StaleGeneration { current, attempted } => {
                write!(f, "stale generation {} (cursor is at {})", attempted, current)
            }
            CursorError::UnknownSubscription(id) => write!(f, "no cursor for subscription {}", id),
        }
    }
}

impl std::error::Error for CursorError {}

/// Watermark plus the resource generation it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub watermark: Option<u64>,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct CursorSlot {
    watermark: Option<u64>,
    generation: u64,
    /// Poll-only: writes for this subscription are no longer persisted
    no_persist: bool,
    degradation_logged: bool,
}

pub struct CursorStore {
    slots: Mutex<HashMap<String, Arc<Mutex<CursorSlot>>>>,
    backend: Option<Arc<dyn StateBackend>>,
    /// Set when the initial load failed
    memory_only: bool,
}

impl CursorStore {
    /// Durable store seeded from a successful load
    pub fn new(backend: Arc<dyn StateBackend>, loaded: &[PersistedSubscription]) -> Self {
        let store = Self {
            slots: Mutex::new(HashMap::new()),
            backend: Some(backend),
            memory_only: false,
        };
        for sub in loaded {
            store.seed(&sub.record.subscriber_id, sub.record.generation, sub.watermark);
        }
        store
    }

    /// Store whose backend could not be read; nothing is persisted
    pub fn memory_only() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            backend: None,
            memory_only: true,
        }
    }

    pub fn is_memory_only(&self) -> bool {
        self.memory_only
    }

    /// Whether writes for `id` still reach the backend
    pub fn is_persisting(&self, id: &str) -> bool {
        if self.memory_only || self.backend.is_none() {
            return false;
        }
        self.existing_slot(id)
            .map(|slot| !lock_slot(&slot).no_persist)
            .unwrap_or(false)
    }

    /// Create the cursor for a newly registered subscription (Unset)
    pub fn create(&self, id: &str, generation: u64) {
        self.seed(id, generation, None);
    }

    pub fn get(&self, id: &str) -> Option<u64> {
        self.existing_slot(id).and_then(|slot| lock_slot(&slot).watermark)
    }

    pub fn snapshot(&self, id: &str) -> Option<CursorSnapshot> {
        self.existing_slot(id).map(|slot| {
            let slot = lock_slot(&slot);
            CursorSnapshot {
                watermark: slot.watermark,
                generation: slot.generation,
            }
        })
    }

    /// Replace the watermark, refusing to move it backward
    pub fn advance(&self, id: &str, new_watermark: u64) -> Result<(), CursorError> {
        let slot = self
            .existing_slot(id)
            .ok_or_else(|| CursorError::UnknownSubscription(id.to_string()))?;
        let mut slot = lock_slot(&slot);
        let generation = slot.generation;
        self.advance_locked(id, &mut slot, generation, new_watermark)
    }

    /// As `advance`, but only if the cursor still belongs to `generation`
    pub fn advance_for(&self, id: &str, generation: u64, new_watermark: u64) -> Result<(), CursorError> {
        let slot = self
            .existing_slot(id)
            .ok_or_else(|| CursorError::UnknownSubscription(id.to_string()))?;
        let mut slot = lock_slot(&slot);
        if slot.generation != generation {
            log::warn!(
                "⚠️  [{}] Ignoring watermark {} computed for generation {} (now {})",
                id,
                new_watermark,
                generation,
                slot.generation
            );
            return Err(CursorError::StaleGeneration {
                current: slot.generation,
                attempted: generation,
            });
        }
        self.advance_locked(id, &mut slot, generation, new_watermark)
    }

    /// Set the watermark back to Unset for a new resource generation
    pub fn reset(&self, id: &str, generation: u64) {
        let slot = self.slot(id);
        let mut slot = lock_slot(&slot);
        slot.watermark = None;
        slot.generation = generation;
        self.persist(id, &mut slot);
        log::info!("🔄 [{}] Watermark reset (generation {})", id, generation);
    }

    /// Drop the cursor of an unregistered subscription
    pub fn remove(&self, id: &str) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(id);
        }
    }

    fn advance_locked(
        &self,
        id: &str,
        slot: &mut CursorSlot,
        generation: u64,
        new_watermark: u64,
    ) -> Result<(), CursorError> {
        match slot.watermark {
            Some(current) if new_watermark < current => {
                log::warn!(
                    "⚠️  [{}] Rejected watermark regression {} -> {}",
                    id,
                    current,
                    new_watermark
                );
                Err(CursorError::Regression {
                    current,
                    attempted: new_watermark,
                })
            }
            Some(current) if new_watermark == current => Ok(()),
            _ => {
                slot.watermark = Some(new_watermark);
                slot.generation = generation;
                self.persist(id, slot);
                Ok(())
            }
        }
    }

    fn persist(&self, id: &str, slot: &mut CursorSlot) {
        let backend = match &self.backend {
            Some(backend) if !self.memory_only && !slot.no_persist => backend,
            _ => {
                if !slot.degradation_logged {
                    log::warn!(
                        "⚠️  [{}] Cursor persistence unavailable, tracking in memory only",
                        id
                    );
                    slot.degradation_logged = true;
                }
                return;
            }
        };

        if let Err(e) = backend.save_watermark(id, slot.generation, slot.watermark) {
            slot.no_persist = true;
            if !slot.degradation_logged {
                log::error!(
                    "❌ [{}] Failed to persist watermark ({}), subscription continues poll-only without persistence",
                    id,
                    e
                );
                slot.degradation_logged = true;
            }
        }
    }

    fn seed(&self, id: &str, generation: u64, watermark: Option<u64>) {
        let slot = self.slot(id);
        let mut slot = lock_slot(&slot);
        slot.watermark = watermark;
        slot.generation = generation;
    }

    fn slot(&self, id: &str) -> Arc<Mutex<CursorSlot>> {
        let mut slots = lock_map(&self.slots);
        slots.entry(id.to_string()).or_default().clone()
    }

    fn existing_slot(&self, id: &str) -> Option<Arc<Mutex<CursorSlot>>> {
        lock_map(&self.slots).get(id).cloned()
    }
}

// Slot state stays consistent even if a holder panicked mid-update: every
// mutation is a plain field assignment. Recover the guard instead of failing.
fn lock_slot(slot: &Mutex<CursorSlot>) -> MutexGuard<'_, CursorSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_map(
    map: &Mutex<HashMap<String, Arc<Mutex<CursorSlot>>>>,
) -> MutexGuard<'_, HashMap<String, Arc<Mutex<CursorSlot>>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
