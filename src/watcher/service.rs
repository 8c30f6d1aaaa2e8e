//! Operator-facing surface: subscription management plus task lifecycle

use crate::delivery::Deliverer;
use crate::ledger::LedgerSource;
use crate::storage::StateBackend;
use crate::watcher::cursor_store::CursorStore;
use crate::watcher::registry::{RegistryError, Subscription, SubscriptionRegistry};
use crate::watcher::scheduler::{CycleError, CycleReport, PollScheduler, PollerConfig};
use std::sync::Arc;

pub struct WatchService {
    registry: Arc<SubscriptionRegistry>,
    cursors: Arc<CursorStore>,
    scheduler: PollScheduler,
}

impl WatchService {
    /// Load persisted state and wire the service together.
    ///
    /// If the backend can't be read the service starts empty and memory-only;
    /// nothing is written back over the unreadable state.
    pub fn open(
        backend: Option<Arc<dyn StateBackend>>,
        source: Arc<dyn LedgerSource>,
        deliverer: Arc<Deliverer>,
        config: PollerConfig,
    ) -> Self {
        let (cursors, registry_backend, loaded) = match backend {
            Some(backend) => match backend.load_all() {
                Ok(loaded) => {
                    log::info!(
                        "💾 Loaded {} subscriptions from {} backend",
                        loaded.len(),
                        backend.backend_type()
                    );
                    (CursorStore::new(backend.clone(), &loaded), Some(backend), loaded)
                }
                Err(e) => {
                    log::error!(
                        "❌ Failed to load state from {} backend: {}",
                        backend.backend_type(),
                        e
                    );
                    log::warn!("⚠️  Continuing memory-only, watermarks will not survive a restart");
                    (CursorStore::memory_only(), None, Vec::new())
                }
            },
            None => {
                log::warn!("⚠️  No state backend configured, running memory-only");
                (CursorStore::memory_only(), None, Vec::new())
            }
        };

        let cursors = Arc::new(cursors);
        let registry = Arc::new(SubscriptionRegistry::new(cursors.clone(), registry_backend, &loaded));
        let scheduler = PollScheduler::new(registry.clone(), cursors.clone(), source, deliverer, config);

        Self {
            registry,
            cursors,
            scheduler,
        }
    }

    /// Register and start polling immediately
    pub fn register(&self, subscriber_id: &str, address: &str) -> Result<Subscription, RegistryError> {
        let subscription = self.registry.register(subscriber_id, address)?;
        self.scheduler.spawn(subscriber_id);
        Ok(subscription)
    }

    /// Toggle delivery; polling and watermark advancement continue either way
    pub fn set_enabled(&self, subscriber_id: &str, enabled: bool) -> Result<Subscription, RegistryError> {
        self.registry.set_enabled(subscriber_id, enabled)
    }

    /// Watch a different address from the next cycle on, re-baselining first
    pub fn set_resource(&self, subscriber_id: &str, address: &str) -> Result<Subscription, RegistryError> {
        self.registry.set_resource(subscriber_id, address)
    }

    /// Stop the poll task and forget the subscription and its watermark
    pub fn unregister(&self, subscriber_id: &str) -> Result<Subscription, RegistryError> {
        self.scheduler.cancel(subscriber_id);
        self.registry.unregister(subscriber_id)
    }

    pub fn list(&self) -> Vec<Subscription> {
        self.registry.list()
    }

    /// Subscriptions with delivery enabled
    pub fn list_active(&self) -> Vec<Subscription> {
        self.registry.list_active()
    }

    pub fn get(&self, subscriber_id: &str) -> Option<Subscription> {
        self.registry.snapshot(subscriber_id)
    }

    /// Start a poll task for every loaded subscription that lacks one
    pub fn resume(&self) -> usize {
        let started = self
            .registry
            .list()
            .iter()
            .filter(|sub| self.scheduler.spawn(&sub.subscriber_id))
            .count();
        if started > 0 {
            log::info!("🔄 Resumed {} poll tasks", started);
        }
        started
    }

    /// Run one cycle for `subscriber_id` right now
    pub async fn poll_once(&self, subscriber_id: &str) -> Result<CycleReport, CycleError> {
        self.scheduler.run_cycle(subscriber_id).await
    }

    pub fn is_polling(&self, subscriber_id: &str) -> bool {
        self.scheduler.is_running(subscriber_id)
    }

    pub fn running_count(&self) -> usize {
        self.scheduler.running_count()
    }

    pub fn is_memory_only(&self) -> bool {
        self.cursors.is_memory_only()
    }

    /// Stop all poll tasks, letting in-flight cycles finish
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
