//! Watcher Runtime
//!
//! Resumes every persisted subscription, seeds any configured ones and polls
//! until CTRL+C.
//!
//! Usage:
//!   cargo run --release --bin watcher_runtime
//!
//! Environment variables: see `tonflow::config::WatcherConfig::from_env`.

use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use tonflow::config::{StateBackendKind, WatcherConfig};
use tonflow::delivery::{DeadLetterWriter, Deliverer, DeliverySink, LogSink, TelegramSink};
use tonflow::ledger::{LedgerSource, ToncenterClient};
use tonflow::storage::{JsonFileStateBackend, SqliteStateBackend, StateBackend};
use tonflow::watcher::{RegistryError, WatchService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let config = WatcherConfig::from_env()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.rust_log.as_str()))
        .init();

    info!("🚀 TON Watcher Runtime");
    info!("   ├─ Upstream: {}", config.toncenter_url);
    info!("   ├─ Poll interval: {}ms", config.poll_interval.as_millis());
    info!("   ├─ Fetch limit: {} (timeout {}ms)", config.fetch_limit, config.fetch_timeout.as_millis());
    info!("   ├─ Delivery policy: {:?}", config.delivery_policy);
    info!("   └─ State: {:?} at {}", config.state_backend, config.state_path);

    let backend: Option<Arc<dyn StateBackend>> = match config.state_backend {
        StateBackendKind::Sqlite => match SqliteStateBackend::new(&config.state_path) {
            Ok(backend) => Some(Arc::new(backend)),
            Err(e) => {
                error!("❌ Failed to open state database {}: {}", config.state_path, e);
                None
            }
        },
        StateBackendKind::Json => Some(Arc::new(JsonFileStateBackend::new(&config.state_path))),
    };

    let source: Arc<dyn LedgerSource> = Arc::new(ToncenterClient::new(
        config.toncenter_url.clone(),
        config.ton_api_key.clone(),
        config.fetch_timeout,
    )?);
    info!("✅ Ledger source: {}", source.source_name());

    let sink: Arc<dyn DeliverySink> = match &config.telegram_token {
        Some(token) => Arc::new(TelegramSink::new(token, config.delivery_timeout)?),
        None => {
            warn!("⚠️  TELEGRAM_TOKEN not set, notifications go to the log only");
            Arc::new(LogSink::new())
        }
    };

    let mut deliverer = Deliverer::new(sink, config.delivery_policy.clone(), config.delivery_timeout);
    if let Some(path) = &config.dead_letter_path {
        deliverer = deliverer.with_dead_letters(DeadLetterWriter::new(path, 10, 3)?);
        info!("📄 Dead letters: {}", path);
    }
    info!("✅ Delivery via {}", deliverer.sink_type());

    let service = WatchService::open(backend, source, Arc::new(deliverer), config.poller_config());

    let resumed = service.resume();
    info!("✅ Resumed {} subscriptions", resumed);

    for (chat, address) in &config.seed_subscriptions {
        match service.register(chat, address) {
            Ok(sub) => info!("🌱 Seeded {} → {}", chat, sub.resource_address),
            Err(RegistryError::AlreadyRegistered(_)) => {}
            Err(e) => error!("❌ Failed to seed {}: {}", chat, e),
        }
    }

    info!("");
    info!("📊 Watcher Status:");
    info!("   ├─ Subscriptions: {}", service.list().len());
    info!("   ├─ Delivering to: {}", service.list_active().len());
    info!("   └─ Poll tasks: {}", service.running_count());
    info!("");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    service.shutdown().await;

    info!("✅ Watcher runtime stopped");
    Ok(())
}
