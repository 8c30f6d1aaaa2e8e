//! Restart behaviour against the SQLite and JSON state backends
//!
//! A "restart" drops the service and opens a new one on the same state path.

#[cfg(test)]
mod restart_resume_tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;
    use tonflow::delivery::{DeliveryPolicy, Deliverer, LogSink};
    use tonflow::ledger::{FetchError, LedgerSource};
    use tonflow::storage::{JsonFileStateBackend, SqliteStateBackend, StateBackend};
    use tonflow::watcher::{PollerConfig, WatchService};

    const ADDR: &str = "EQDtFpEwcFAEcRe5mLVh2N6C0x-_hJEM7W61_JLnSF74p4q2";
    const OTHER_ADDR: &str = "UQBvW8Z5huBkMJYdnfAEM5JqTNkuWX3diqYENkWsIL0XggGG";

    #[derive(Default)]
    struct Ledger {
        lts: Mutex<Vec<u64>>,
    }

    impl Ledger {
        fn append(&self, lts: &[u64]) {
            self.lts.lock().unwrap().extend_from_slice(lts);
        }
    }

    #[async_trait]
    impl LedgerSource for Ledger {
        async fn fetch_recent(&self, _: &str, limit: usize) -> Result<Vec<Value>, FetchError> {
            Ok(self
                .lts
                .lock()
                .unwrap()
                .iter()
                .rev()
                .take(limit)
                .map(|lt| json!({ "lt": lt, "hash": format!("tx{}", lt), "in_msg": { "value": "1" } }))
                .collect())
        }

        fn source_name(&self) -> &'static str {
            "ledger"
        }
    }

    fn open(backend: Option<Arc<dyn StateBackend>>, ledger: &Arc<Ledger>) -> (WatchService, Arc<LogSink>) {
        let sink = Arc::new(LogSink::new());
        let deliverer = Arc::new(Deliverer::new(
            sink.clone(),
            DeliveryPolicy::FireAndForget,
            Duration::from_secs(5),
        ));
        let config = PollerConfig {
            interval: Duration::from_secs(3600),
            start_jitter: false,
            ..PollerConfig::default()
        };
        (WatchService::open(backend, ledger.clone(), deliverer, config), sink)
    }

    fn sqlite(path: &std::path::Path) -> Option<Arc<dyn StateBackend>> {
        Some(Arc::new(SqliteStateBackend::new(path).unwrap()))
    }

    fn json_file(path: &std::path::Path) -> Option<Arc<dyn StateBackend>> {
        Some(Arc::new(JsonFileStateBackend::new(path)))
    }

    fn delivered_lts(sink: &LogSink) -> Vec<u64> {
        sink.delivered()
            .iter()
            .filter_map(|(_, text)| {
                text.lines()
                    .find_map(|l| l.strip_prefix("LT: "))
                    .and_then(|lt| lt.parse().ok())
            })
            .collect()
    }

    async fn restart_delivers_only_new(backend: impl Fn() -> Option<Arc<dyn StateBackend>>) {
        let ledger = Arc::new(Ledger::default());
        ledger.append(&[10, 11]);

        {
            let (service, sink) = open(backend(), &ledger);
            service.register("chat", ADDR).unwrap();
            service.poll_once("chat").await.unwrap();
            ledger.append(&[12]);
            service.poll_once("chat").await.unwrap();
            assert_eq!(delivered_lts(&sink), vec![12]);
            service.shutdown().await;
        }

        // Appended while the process was down
        ledger.append(&[13, 14]);

        let (service, sink) = open(backend(), &ledger);
        assert!(!service.is_memory_only());
        let sub = service.get("chat").unwrap();
        assert_eq!(sub.watermark, Some(12));
        assert_eq!(sub.resource_address, ADDR);

        service.poll_once("chat").await.unwrap();
        assert_eq!(delivered_lts(&sink), vec![13, 14]);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_from_sqlite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tonflow.db");
        restart_delivers_only_new(|| sqlite(&path)).await;
    }

    #[tokio::test]
    async fn test_restart_from_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        restart_delivers_only_new(|| json_file(&path)).await;
    }

    #[tokio::test]
    async fn test_resume_spawns_persisted_subscriptions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tonflow.db");
        let ledger = Arc::new(Ledger::default());
        ledger.append(&[1]);

        {
            let (service, _) = open(sqlite(&path), &ledger);
            service.register("a", ADDR).unwrap();
            service.register("b", OTHER_ADDR).unwrap();
            service.set_enabled("b", false).unwrap();
            service.shutdown().await;
        }

        let (service, _) = open(sqlite(&path), &ledger);
        assert_eq!(service.list().len(), 2);
        assert!(!service.get("b").unwrap().enabled);
        assert_eq!(service.resume(), 2);
        assert!(service.is_polling("a"));
        assert!(service.is_polling("b"));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_resource_change_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tonflow.db");
        let ledger = Arc::new(Ledger::default());
        ledger.append(&[700]);

        {
            let (service, _) = open(sqlite(&path), &ledger);
            service.register("chat", ADDR).unwrap();
            service.poll_once("chat").await.unwrap();
            service.set_resource("chat", OTHER_ADDR).unwrap();
            service.shutdown().await;
        }

        // The old watermark must not come back for the new address
        let (service, _) = open(sqlite(&path), &ledger);
        let sub = service.get("chat").unwrap();
        assert_eq!(sub.resource_address, OTHER_ADDR);
        assert_eq!(sub.watermark, None);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_legacy_state_file_resumes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            format!(r#"{{"chat_monitors": {{"123456": {{"address": "{}", "last_lt": "100"}}}}}}"#, ADDR),
        )
        .unwrap();

        let ledger = Arc::new(Ledger::default());
        ledger.append(&[99, 100, 101, 103]);

        let (service, sink) = open(json_file(&path), &ledger);
        let sub = service.get("123456").unwrap();
        assert_eq!(sub.watermark, Some(100));
        assert!(sub.enabled);

        service.poll_once("123456").await.unwrap();
        assert_eq!(delivered_lts(&sink), vec![101, 103]);

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["chat_monitors"]["123456"]["address"], ADDR);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_corrupt_state_runs_memory_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        let ledger = Arc::new(Ledger::default());
        ledger.append(&[1]);

        let (service, sink) = open(json_file(&path), &ledger);
        assert!(service.is_memory_only());
        assert!(service.list().is_empty());

        // Still watches and notifies, just without durability
        service.register("chat", ADDR).unwrap();
        service.poll_once("chat").await.unwrap();
        ledger.append(&[2]);
        service.poll_once("chat").await.unwrap();
        assert_eq!(delivered_lts(&sink), vec![2]);

        // The unreadable file is left alone
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ this is not json");
        service.shutdown().await;
    }
}
