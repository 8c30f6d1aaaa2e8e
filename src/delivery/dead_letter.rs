//! Append-only JSONL log of notifications that could not be delivered

use crate::storage::StoreError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub timestamp: i64,
    pub subscriber_id: String,
    pub order_key: Option<u64>,
    pub attempts: u32,
    pub error: String,
    pub text: String,
}

pub struct DeadLetterWriter {
    file: BufWriter<File>,
    current_size: u64,
    max_size: u64,
    base_path: PathBuf,
    max_rotations: u32,
}

impl DeadLetterWriter {
    pub fn new(path: impl AsRef<Path>, max_size_mb: u64, max_rotations: u32) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            file: BufWriter::new(file),
            current_size,
            max_size: max_size_mb.max(1) * 1024 * 1024,
            base_path: path.to_path_buf(),
            max_rotations: max_rotations.max(1),
        })
    }

    pub fn append(&mut self, letter: &DeadLetter) -> Result<(), StoreError> {
        let json = serde_json::to_string(letter)?;
        writeln!(self.file, "{}", json)?;
        self.file.flush()?;

        self.current_size += (json.len() + 1) as u64;
        if self.current_size >= self.max_size {
            self.rotate()?;
        }
        Ok(())
    }

    /// `dead.jsonl` → `dead.jsonl.1` → ... → `dead.jsonl.{max_rotations}` (dropped beyond)
    fn rotate(&mut self) -> Result<(), StoreError> {
        self.file.flush()?;

        let oldest = self.rotated_path(self.max_rotations);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        for i in (1..self.max_rotations).rev() {
            let old_path = self.rotated_path(i);
            if old_path.exists() {
                std::fs::rename(&old_path, self.rotated_path(i + 1))?;
            }
        }
        if self.base_path.exists() {
            std::fs::rename(&self.base_path, self.rotated_path(1))?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.base_path)?;
        self.file = BufWriter::new(file);
        self.current_size = 0;

        log::info!("📄 Rotated dead-letter file {}", self.base_path.display());
        Ok(())
    }

    fn rotated_path(&self, index: u32) -> PathBuf {
        let mut name = self.base_path.as_os_str().to_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }
}
