//! Per-subscription poll loops
//!
//! Every subscription gets its own tokio task ticking on a fixed interval.
//! One tick runs one cycle:
//!
//! ```text
//! Idle → Fetching → Normalizing → Detecting → Delivering → Persisting → Idle
//! ```
//!
//! Failure isolation:
//! - fetch error or timeout: cycle aborted, next tick retries
//! - malformed record: skipped, cycle continues
//! - delivery failure: logged, remaining events still delivered, watermark advances
//!
//! Only the fetch and the deliveries await. Cycles for one subscription are
//! serialized, so a manual `run_cycle` never overlaps the task's own cycle.
//! Stopping a task takes effect before its next tick; a cycle already running
//! is left to finish.

use crate::delivery::{render_event, Deliverer, DeliveryOutcome};
use crate::ledger::{normalize_batch, FetchError, LedgerSource};
use crate::watcher::cursor_store::{CursorError, CursorStore};
use crate::watcher::detector::detect;
use crate::watcher::registry::SubscriptionRegistry;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub fetch_limit: usize,
    /// Delay each task's first tick by a random fraction of the interval
    pub start_jitter: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(8),
            fetch_timeout: Duration::from_secs(20),
            fetch_limit: 20,
            start_jitter: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Normalizing,
    Detecting,
    Delivering,
    Persisting,
}

/// What one poll cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub normalized: usize,
    pub skipped: usize,
    pub discarded: usize,
    pub new_events: usize,
    pub delivered: usize,
    pub failed: usize,
    /// New events not sent because delivery is disabled
    pub suppressed: usize,
    pub baselined: bool,
    pub persisted: bool,
    pub watermark: Option<u64>,
}

#[derive(Debug)]
pub enum CycleError {
    NotRegistered(String),
    Fetch(FetchError),
}

impl From<FetchError> for CycleError {
    fn from(err: FetchError) -> Self {
        CycleError::Fetch(err)
    }
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::NotRegistered(id) => write!(f, "subscription {} is not registered", id),
            CycleError::Fetch(e) => write!(f, "fetch failed: {}", e),
        }
    }
}

impl std::error::Error for CycleError {}

/// Everything a poll task needs, cheap to clone into each task
#[derive(Clone)]
struct CycleRunner {
    registry: Arc<SubscriptionRegistry>,
    cursors: Arc<CursorStore>,
    source: Arc<dyn LedgerSource>,
    deliverer: Arc<Deliverer>,
    config: PollerConfig,
    gates: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl CycleRunner {
    async fn run_cycle(&self, id: &str) -> Result<CycleReport, CycleError> {
        let gate = self.gate(id);
        let _in_flight = gate.lock().await;

        // Copy for the whole cycle: registry changes apply from the next one
        let Some(sub) = self.registry.snapshot(id) else {
            self.gates().remove(id);
            return Err(CycleError::NotRegistered(id.to_string()));
        };
        let mut report = CycleReport {
            watermark: sub.watermark,
            ..CycleReport::default()
        };

        trace_phase(id, CyclePhase::Fetching);
        let records = match timeout(
            self.config.fetch_timeout,
            self.source.fetch_recent(&sub.resource_address, self.config.fetch_limit),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(self.config.fetch_timeout).into()),
        };
        report.fetched = records.len();

        trace_phase(id, CyclePhase::Normalizing);
        let batch = normalize_batch(&records);
        report.normalized = batch.events.len();
        report.skipped = batch.skipped;

        trace_phase(id, CyclePhase::Detecting);
        let detection = detect(batch.events, sub.watermark);
        report.discarded = detection.discarded;
        report.new_events = detection.new_events.len();
        report.baselined = detection.baselined;

        trace_phase(id, CyclePhase::Delivering);
        for event in &detection.new_events {
            if !sub.enabled {
                report.suppressed += 1;
                continue;
            }
            let text = render_event(&sub.resource_address, event);
            match self.deliverer.deliver(id, event.order_key, &text).await {
                DeliveryOutcome::Delivered { .. } => report.delivered += 1,
                DeliveryOutcome::Failed { .. } => report.failed += 1,
            }
        }

        trace_phase(id, CyclePhase::Persisting);
        if let Some(next) = detection.next_watermark.filter(|next| Some(*next) != sub.watermark) {
            match self.cursors.advance_for(id, sub.generation, next) {
                Ok(()) => {
                    report.persisted = true;
                    report.watermark = Some(next);
                }
                Err(CursorError::UnknownSubscription(_)) => {
                    log::debug!("[{}] Unregistered mid-cycle, watermark {} dropped", id, next);
                }
                Err(e) => log::warn!("⚠️  [{}] Watermark not advanced: {}", id, e),
            }
        }

        trace_phase(id, CyclePhase::Idle);
        Ok(report)
    }

    fn gate(&self, id: &str) -> Arc<AsyncMutex<()>> {
        self.gates().entry(id.to_string()).or_default().clone()
    }

    fn gates(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_delay(&self) -> Option<Duration> {
        let interval_ms = self.config.interval.as_millis() as u64;
        if !self.config.start_jitter || interval_ms == 0 {
            return None;
        }
        Some(Duration::from_millis(rand::thread_rng().gen_range(0..interval_ms)))
    }
}

fn trace_phase(id: &str, phase: CyclePhase) {
    log::trace!("[{}] {:?}", id, phase);
}

struct PollTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct PollScheduler {
    runner: CycleRunner,
    tasks: Mutex<HashMap<String, PollTask>>,
}

impl PollScheduler {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        cursors: Arc<CursorStore>,
        source: Arc<dyn LedgerSource>,
        deliverer: Arc<Deliverer>,
        config: PollerConfig,
    ) -> Self {
        Self {
            runner: CycleRunner {
                registry,
                cursors,
                source,
                deliverer,
                config,
                gates: Arc::new(Mutex::new(HashMap::new())),
            },
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Run a single cycle for `id` outside of any task
    pub async fn run_cycle(&self, id: &str) -> Result<CycleReport, CycleError> {
        self.runner.run_cycle(id).await
    }

    /// Start the poll task for `id`. Returns false if one is already running.
    pub fn spawn(&self, id: &str) -> bool {
        let mut tasks = self.tasks();
        if tasks.get(id).is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let (stop, stop_rx) = watch::channel(false);
        let runner = self.runner.clone();
        let task_id = id.to_string();
        let handle = tokio::spawn(async move {
            poll_loop(runner, task_id, stop_rx).await;
        });

        tasks.insert(id.to_string(), PollTask { stop, handle });
        log::info!("▶️  [{}] Poll task started", id);
        true
    }

    /// Signal the task for `id` to stop before its next tick.
    ///
    /// Returns the task handle so callers can wait for an in-flight cycle.
    pub fn cancel(&self, id: &str) -> Option<JoinHandle<()>> {
        let task = self.tasks().remove(id)?;
        let _ = task.stop.send(true);
        log::info!("⏹️  [{}] Poll task stopping", id);
        Some(task.handle)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.tasks()
            .get(id)
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn running_count(&self) -> usize {
        self.tasks()
            .values()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    /// Stop every task and wait for in-flight cycles to finish
    pub async fn shutdown(&self) {
        let tasks: Vec<(String, PollTask)> = self.tasks().drain().collect();
        for (_, task) in &tasks {
            let _ = task.stop.send(true);
        }
        for (id, task) in tasks {
            if let Err(e) = task.handle.await {
                log::warn!("⚠️  [{}] Poll task ended abnormally: {}", id, e);
            }
        }
        log::info!("✅ All poll tasks stopped");
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, PollTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn poll_loop(runner: CycleRunner, id: String, mut stop: watch::Receiver<bool>) {
    if let Some(delay) = runner.start_delay() {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => return,
        }
    }

    let mut ticker = interval(runner.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }
        if *stop.borrow() {
            break;
        }

        match runner.run_cycle(&id).await {
            Ok(report) => {
                if report.new_events > 0 || report.baselined {
                    log::debug!(
                        "🔍 [{}] fetched {} new {} delivered {} failed {} suppressed {} → watermark {:?}",
                        id,
                        report.fetched,
                        report.new_events,
                        report.delivered,
                        report.failed,
                        report.suppressed,
                        report.watermark
                    );
                }
                if report.skipped > 0 || report.discarded > 0 {
                    log::warn!(
                        "⚠️  [{}] {} records skipped, {} events discarded",
                        id,
                        report.skipped,
                        report.discarded
                    );
                }
            }
            Err(CycleError::NotRegistered(_)) => {
                log::info!("[{}] Subscription gone, poll task exiting", id);
                break;
            }
            Err(e) => log::warn!(
                "⚠️  [{}] Poll cycle aborted ({}): {}",
                id,
                runner.source.source_name(),
                e
            ),
        }
    }

    log::debug!("[{}] Poll task exited", id);
}
