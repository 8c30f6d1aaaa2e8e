use crate::sqlite_pragma::apply_optimized_pragmas;
use crate::storage::{PersistedSubscription, StateBackend, StoreError, SubscriptionRecord};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS subscriptions (
        subscriber_id TEXT PRIMARY KEY,
        resource_address TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        generation INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS cursors (
        subscriber_id TEXT PRIMARY KEY,
        generation INTEGER NOT NULL,
        watermark INTEGER,
        updated_at INTEGER NOT NULL
    );
";

/// SQLite-backed subscription state (default backend)
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;

        log::info!("✅ SQLite state store ready: {}", db_path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }
}

fn to_sql_int(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} {} exceeds i64", what, value)))
}

impl StateBackend for SqliteStateBackend {
    fn load_all(&self) -> Result<Vec<PersistedSubscription>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.subscriber_id, s.resource_address, s.enabled, s.generation, c.watermark
             FROM subscriptions s
             LEFT JOIN cursors c
               ON c.subscriber_id = s.subscriber_id AND c.generation = s.generation
             ORDER BY s.subscriber_id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })?;

        let mut loaded = Vec::new();
        for row in rows {
            let (subscriber_id, resource_address, enabled, generation, watermark) = row?;
            let generation = u64::try_from(generation)
                .map_err(|_| StoreError::Corrupt(format!("negative generation for {}", subscriber_id)))?;
            let watermark = watermark
                .map(u64::try_from)
                .transpose()
                .map_err(|_| StoreError::Corrupt(format!("negative watermark for {}", subscriber_id)))?;

            loaded.push(PersistedSubscription {
                record: SubscriptionRecord {
                    subscriber_id,
                    resource_address,
                    enabled,
                    generation,
                },
                watermark,
            });
        }

        Ok(loaded)
    }

    fn save_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        let generation = to_sql_int(record.generation, "generation")?;

        self.conn()?.execute(
            "INSERT INTO subscriptions (subscriber_id, resource_address, enabled, generation, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(subscriber_id) DO UPDATE SET
                 resource_address = excluded.resource_address,
                 enabled = excluded.enabled,
                 generation = excluded.generation,
                 updated_at = excluded.updated_at",
            params![
                record.subscriber_id,
                record.resource_address,
                record.enabled,
                generation,
                now
            ],
        )?;
        Ok(())
    }

    fn save_watermark(
        &self,
        subscriber_id: &str,
        generation: u64,
        watermark: Option<u64>,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        let generation = to_sql_int(generation, "generation")?;
        let watermark = watermark.map(|w| to_sql_int(w, "watermark")).transpose()?;

        self.conn()?.execute(
            "INSERT INTO cursors (subscriber_id, generation, watermark, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(subscriber_id) DO UPDATE SET
                 generation = excluded.generation,
                 watermark = excluded.watermark,
                 updated_at = excluded.updated_at",
            params![subscriber_id, generation, watermark, now],
        )?;
        Ok(())
    }

    fn remove(&self, subscriber_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cursors WHERE subscriber_id = ?1", params![subscriber_id])?;
        tx.execute("DELETE FROM subscriptions WHERE subscriber_id = ?1", params![subscriber_id])?;
        tx.commit()?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str, address: &str, generation: u64) -> SubscriptionRecord {
        SubscriptionRecord {
            subscriber_id: id.to_string(),
            resource_address: address.to_string(),
            enabled: true,
            generation,
        }
    }

    #[test]
    fn test_roundtrip_across_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("state").join("tonflow.db");

        {
            let backend = SqliteStateBackend::new(&db_path).unwrap();
            backend.save_subscription(&record("chat-1", "EQA", 0)).unwrap();
            backend.save_watermark("chat-1", 0, Some(48_000_000_001)).unwrap();
            backend.save_subscription(&record("chat-2", "EQB", 0)).unwrap();
        }

        let backend = SqliteStateBackend::new(&db_path).unwrap();
        let loaded = backend.load_all().unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].record.subscriber_id, "chat-1");
        assert_eq!(loaded[0].watermark, Some(48_000_000_001));
        assert_eq!(loaded[1].record.resource_address, "EQB");
        assert_eq!(loaded[1].watermark, None);
    }

    #[test]
    fn test_stale_generation_watermark_ignored() {
        let dir = tempdir().unwrap();
        let backend = SqliteStateBackend::new(dir.path().join("t.db")).unwrap();

        backend.save_subscription(&record("chat", "EQOld", 0)).unwrap();
        backend.save_watermark("chat", 0, Some(500)).unwrap();

        // Address changed: generation bumps, cursor row still carries gen 0
        backend.save_subscription(&record("chat", "EQNew", 1)).unwrap();

        let loaded = backend.load_all().unwrap();
        assert_eq!(loaded[0].record.resource_address, "EQNew");
        assert_eq!(loaded[0].watermark, None);
    }

    #[test]
    fn test_update_preserves_watermark() {
        let dir = tempdir().unwrap();
        let backend = SqliteStateBackend::new(dir.path().join("t.db")).unwrap();

        backend.save_subscription(&record("chat", "EQA", 3)).unwrap();
        backend.save_watermark("chat", 3, Some(77)).unwrap();

        let mut disabled = record("chat", "EQA", 3);
        disabled.enabled = false;
        backend.save_subscription(&disabled).unwrap();

        let loaded = backend.load_all().unwrap();
        assert!(!loaded[0].record.enabled);
        assert_eq!(loaded[0].watermark, Some(77));
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let backend = SqliteStateBackend::new(dir.path().join("t.db")).unwrap();

        backend.save_subscription(&record("chat", "EQA", 0)).unwrap();
        backend.save_watermark("chat", 0, Some(1)).unwrap();
        backend.remove("chat").unwrap();

        assert!(backend.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("t.db");
        let _backend = SqliteStateBackend::new(&db_path).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
    }
}
