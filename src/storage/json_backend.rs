//! JSON state file backend
//!
//! File layout (compatible with existing `state.json` files of the
//! single-file bot, which only carried `address` and `last_lt`):
//!
//! ```json
//! {
//!   "chat_monitors": {
//!     "123456": { "address": "EQ...", "last_lt": "48012345000001", "enabled": true, "generation": 0 }
//!   }
//! }
//! ```
//!
//! The whole file is rewritten on every change (write to `.tmp`, then rename).

use crate::storage::{PersistedSubscription, StateBackend, StoreError, SubscriptionRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// `last_lt` has been written both as a JSON string and as a number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum LtRepr {
    Number(u64),
    Text(String),
}

impl LtRepr {
    fn value(&self) -> Option<u64> {
        match self {
            LtRepr::Number(n) => Some(*n),
            LtRepr::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MonitorEntry {
    address: String,
    #[serde(default)]
    last_lt: Option<LtRepr>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    generation: u64,
    /// Generation `last_lt` belongs to; absent in legacy files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cursor_generation: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    chat_monitors: BTreeMap<String, MonitorEntry>,
}

pub struct JsonFileStateBackend {
    path: PathBuf,
    state: Mutex<StateFile>,
}

impl JsonFileStateBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(StateFile::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, StateFile>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Corrupt("state lock poisoned".to_string()))
    }

    fn write_file(&self, state: &StateFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        log::debug!("Saved {} monitors to {}", state.chat_monitors.len(), self.path.display());
        Ok(())
    }
}

impl StateBackend for JsonFileStateBackend {
    fn load_all(&self) -> Result<Vec<PersistedSubscription>, StoreError> {
        let mut state = self.state()?;

        if !self.path.exists() {
            log::info!("No existing state file found: {}", self.path.display());
            *state = StateFile::default();
            return Ok(Vec::new());
        }

        let json = fs::read_to_string(&self.path)?;
        let parsed: StateFile = serde_json::from_str(&json)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", self.path.display(), e)))?;

        let loaded = parsed
            .chat_monitors
            .iter()
            .map(|(id, entry)| {
                // Legacy entries have no cursor generation: the lt belongs to the current address
                let cursor_generation = entry.cursor_generation.unwrap_or(entry.generation);
                let watermark = entry
                    .last_lt
                    .as_ref()
                    .and_then(LtRepr::value)
                    .filter(|_| cursor_generation == entry.generation);
                PersistedSubscription {
                    record: SubscriptionRecord {
                        subscriber_id: id.clone(),
                        resource_address: entry.address.clone(),
                        enabled: entry.enabled,
                        generation: entry.generation,
                    },
                    watermark,
                }
            })
            .collect();

        log::info!(
            "Loaded {} monitors from {}",
            parsed.chat_monitors.len(),
            self.path.display()
        );
        *state = parsed;
        Ok(loaded)
    }

    fn save_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state
            .chat_monitors
            .entry(record.subscriber_id.clone())
            .and_modify(|entry| {
                if entry.generation != record.generation {
                    // Pin the old lt to the generation it was read under
                    entry.cursor_generation = Some(entry.cursor_generation.unwrap_or(entry.generation));
                }
                entry.address = record.resource_address.clone();
                entry.enabled = record.enabled;
                entry.generation = record.generation;
            })
            .or_insert_with(|| MonitorEntry {
                address: record.resource_address.clone(),
                last_lt: None,
                enabled: record.enabled,
                generation: record.generation,
                cursor_generation: None,
            });
        self.write_file(&state)
    }

    fn save_watermark(
        &self,
        subscriber_id: &str,
        generation: u64,
        watermark: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let Some(entry) = state.chat_monitors.get_mut(subscriber_id) else {
            return Err(StoreError::Corrupt(format!(
                "no monitor entry for {}",
                subscriber_id
            )));
        };
        entry.last_lt = watermark.map(|w| LtRepr::Text(w.to_string()));
        entry.cursor_generation = Some(generation);
        self.write_file(&state)
    }

    fn remove(&self, subscriber_id: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.chat_monitors.remove(subscriber_id).is_some() {
            self.write_file(&state)?;
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSON"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str, address: &str) -> SubscriptionRecord {
        SubscriptionRecord {
            subscriber_id: id.to_string(),
            resource_address: address.to_string(),
            enabled: true,
            generation: 0,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let backend = JsonFileStateBackend::new(dir.path().join("state.json"));
        assert!(backend.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let backend = JsonFileStateBackend::new(&path);
        backend.load_all().unwrap();
        backend.save_subscription(&record("42", "EQA")).unwrap();
        backend.save_watermark("42", 0, Some(1000)).unwrap();

        let reopened = JsonFileStateBackend::new(&path);
        let loaded = reopened.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].record.resource_address, "EQA");
        assert_eq!(loaded[0].watermark, Some(1000));
    }

    #[test]
    fn test_legacy_file_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"chat_monitors": {
                "100": {"address": "EQLegacy", "last_lt": "31000000000005"},
                "200": {"address": "EQNumeric", "last_lt": 17},
                "300": {"address": "EQFresh", "last_lt": null}
            }}"#,
        )
        .unwrap();

        let loaded = JsonFileStateBackend::new(&path).load_all().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].watermark, Some(31_000_000_000_005));
        assert!(loaded[0].record.enabled);
        assert_eq!(loaded[1].watermark, Some(17));
        assert_eq!(loaded[2].watermark, None);
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStateBackend::new(&path).load_all().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_stale_cursor_generation_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let backend = JsonFileStateBackend::new(&path);
        backend.save_subscription(&record("1", "EQOld")).unwrap();
        backend.save_watermark("1", 0, Some(9)).unwrap();

        let mut moved = record("1", "EQNew");
        moved.generation = 1;
        backend.save_subscription(&moved).unwrap();

        let loaded = JsonFileStateBackend::new(&path).load_all().unwrap();
        assert_eq!(loaded[0].record.resource_address, "EQNew");
        assert_eq!(loaded[0].watermark, None);
    }

    #[test]
    fn test_legacy_lt_dropped_after_address_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"chat_monitors": {"7": {"address": "EQOld", "last_lt": "5000"}}}"#,
        )
        .unwrap();

        let backend = JsonFileStateBackend::new(&path);
        assert_eq!(backend.load_all().unwrap()[0].watermark, Some(5000));

        // Address written, cursor reset never reached the file
        let mut moved = record("7", "EQNew");
        moved.generation = 1;
        backend.save_subscription(&moved).unwrap();

        let loaded = JsonFileStateBackend::new(&path).load_all().unwrap();
        assert_eq!(loaded[0].record.resource_address, "EQNew");
        assert_eq!(loaded[0].record.generation, 1);
        assert_eq!(loaded[0].watermark, None);

        // Enabling alone keeps the generation and the cursor
        backend.save_watermark("7", 1, Some(12)).unwrap();
        moved.enabled = false;
        backend.save_subscription(&moved).unwrap();
        let loaded = JsonFileStateBackend::new(&path).load_all().unwrap();
        assert_eq!(loaded[0].watermark, Some(12));
    }
}
