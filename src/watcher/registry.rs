//! Subscription registry
//!
//! Owns `resource_address`, `enabled` and `generation` of every subscription.
//! Watermarks stay in the `CursorStore`; the registry only asks it to create,
//! reset or drop a cursor.
//!
//! Reads for a poll cycle go through `snapshot`, which copies the record and
//! its cursor under the registry read lock. `set_resource` updates both under
//! the write lock, so a snapshot is never half old address, half new cursor.

use crate::storage::{PersistedSubscription, StateBackend, SubscriptionRecord};
use crate::watcher::cursor_store::CursorStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    AlreadyRegistered(String),
    NotFound(String),
    InvalidAddress(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::AlreadyRegistered(id) => write!(f, "subscriber {} is already registered", id),
            RegistryError::NotFound(id) => write!(f, "subscriber {} is not registered", id),
            RegistryError::InvalidAddress(addr) => write!(f, "invalid address: {:?}", addr),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Point-in-time copy of one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub subscriber_id: String,
    pub resource_address: String,
    pub enabled: bool,
    pub generation: u64,
    /// `None` until the first successful poll
    pub watermark: Option<u64>,
}

pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, SubscriptionRecord>>,
    cursors: Arc<CursorStore>,
    backend: Option<Arc<dyn StateBackend>>,
    /// Last generation of each unregistered subscriber id
    retired: Mutex<HashMap<String, u64>>,
}

impl SubscriptionRegistry {
    /// Registry restored from persisted state (empty slice for a fresh start)
    pub fn new(
        cursors: Arc<CursorStore>,
        backend: Option<Arc<dyn StateBackend>>,
        loaded: &[PersistedSubscription],
    ) -> Self {
        let entries = loaded
            .iter()
            .map(|sub| (sub.record.subscriber_id.clone(), sub.record.clone()))
            .collect();

        Self {
            entries: RwLock::new(entries),
            cursors,
            backend,
            retired: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, subscriber_id: &str, address: &str) -> Result<Subscription, RegistryError> {
        let address = validate_address(address)?;
        let mut entries = self.write();

        if entries.contains_key(subscriber_id) {
            return Err(RegistryError::AlreadyRegistered(subscriber_id.to_string()));
        }

        // Generations never repeat for an id, so a cycle still running for a
        // previous registration can't write onto this one's cursor
        let generation = self
            .retired()
            .remove(subscriber_id)
            .map_or(0, |last| last + 1);

        let record = SubscriptionRecord {
            subscriber_id: subscriber_id.to_string(),
            resource_address: address,
            enabled: true,
            generation,
        };
        self.persist(&record);
        self.cursors.create(subscriber_id, record.generation);
        entries.insert(subscriber_id.to_string(), record.clone());

        log::info!("➕ [{}] Registered {}", subscriber_id, record.resource_address);
        Ok(self.to_subscription(&record))
    }

    pub fn unregister(&self, subscriber_id: &str) -> Result<Subscription, RegistryError> {
        let mut entries = self.write();
        let record = entries
            .remove(subscriber_id)
            .ok_or_else(|| RegistryError::NotFound(subscriber_id.to_string()))?;

        let subscription = self.to_subscription(&record);
        self.retired().insert(subscriber_id.to_string(), record.generation);
        self.cursors.remove(subscriber_id);
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.remove(subscriber_id) {
                log::warn!("⚠️  [{}] Failed to remove persisted subscription: {}", subscriber_id, e);
            }
        }

        log::info!("➖ [{}] Unregistered", subscriber_id);
        Ok(subscription)
    }

    /// Point the subscription at a new address and re-baseline its cursor.
    ///
    /// Setting the address it already watches changes nothing.
    pub fn set_resource(&self, subscriber_id: &str, address: &str) -> Result<Subscription, RegistryError> {
        let address = validate_address(address)?;
        let mut entries = self.write();
        let record = entries
            .get_mut(subscriber_id)
            .ok_or_else(|| RegistryError::NotFound(subscriber_id.to_string()))?;

        if record.resource_address == address {
            return Ok(self.to_subscription(record));
        }

        record.resource_address = address;
        record.generation += 1;
        self.persist(record);
        self.cursors.reset(subscriber_id, record.generation);

        log::info!(
            "🔁 [{}] Now watching {} (generation {})",
            subscriber_id,
            record.resource_address,
            record.generation
        );
        Ok(self.to_subscription(record))
    }

    pub fn set_enabled(&self, subscriber_id: &str, enabled: bool) -> Result<Subscription, RegistryError> {
        let mut entries = self.write();
        let record = entries
            .get_mut(subscriber_id)
            .ok_or_else(|| RegistryError::NotFound(subscriber_id.to_string()))?;

        if record.enabled != enabled {
            record.enabled = enabled;
            self.persist(record);
            log::info!(
                "{} [{}] Notifications {}",
                if enabled { "🔔" } else { "🔕" },
                subscriber_id,
                if enabled { "enabled" } else { "disabled" }
            );
        }
        Ok(self.to_subscription(record))
    }

    /// Copy of one subscription for a single poll cycle
    pub fn snapshot(&self, subscriber_id: &str) -> Option<Subscription> {
        let entries = self.read();
        entries.get(subscriber_id).map(|record| self.to_subscription(record))
    }

    /// All subscriptions, ordered by subscriber id
    pub fn list(&self) -> Vec<Subscription> {
        let entries = self.read();
        let mut subs: Vec<Subscription> = entries.values().map(|r| self.to_subscription(r)).collect();
        subs.sort_by(|a, b| a.subscriber_id.cmp(&b.subscriber_id));
        subs
    }

    /// Subscriptions with delivery enabled
    pub fn list_active(&self) -> Vec<Subscription> {
        self.list().into_iter().filter(|s| s.enabled).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_subscription(&self, record: &SubscriptionRecord) -> Subscription {
        let cursor = self.cursors.snapshot(&record.subscriber_id);
        // A cursor from another generation has not been re-baselined yet
        let watermark = cursor
            .filter(|c| c.generation == record.generation)
            .and_then(|c| c.watermark);

        Subscription {
            subscriber_id: record.subscriber_id.clone(),
            resource_address: record.resource_address.clone(),
            enabled: record.enabled,
            generation: record.generation,
            watermark,
        }
    }

    fn persist(&self, record: &SubscriptionRecord) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.save_subscription(record) {
                log::warn!(
                    "⚠️  [{}] Failed to persist subscription ({}), change kept in memory",
                    record.subscriber_id,
                    e
                );
            }
        }
    }

    fn retired(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.retired.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SubscriptionRecord>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SubscriptionRecord>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Trim and sanity-check a TON address.
///
/// Accepts the 48-character user-friendly form (base64 or base64url) and the
/// raw `workchain:hex64` form. Checksums are not verified.
pub fn validate_address(address: &str) -> Result<String, RegistryError> {
    let address = address.trim();
    let invalid = || RegistryError::InvalidAddress(address.to_string());

    if let Some((workchain, hash)) = address.split_once(':') {
        let workchain_ok = workchain.parse::<i32>().is_ok();
        let hash_ok = hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit());
        return if workchain_ok && hash_ok {
            Ok(address.to_string())
        } else {
            Err(invalid())
        };
    }

    let friendly_ok = address.len() == 48
        && address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '/'));
    if friendly_ok {
        Ok(address.to_string())
    } else {
        Err(invalid())
    }
}
