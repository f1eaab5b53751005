//! Durable append-only line-delimited JSON log, the on-disk half of every
//! durable log in this crate (events, metrics, cycles, DLQ). One file per
//! log; replay rebuilds whatever in-memory index the owning module keeps.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::StorageError;

pub struct AppendLog {
    path: PathBuf,
    file: File,
}

impl AppendLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::AppendFailed(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::AppendFailed(e.to_string()))?;
        Ok(Self { path, file })
    }

    /// Serialize `record` as one JSON line and fsync it before returning,
    /// matching the "durable before return" contract on AppendEvent/Metric.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<(), StorageError> {
        let mut line =
            serde_json::to_vec(record).map_err(|e| StorageError::AppendFailed(e.to_string()))?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .map_err(|e| StorageError::AppendFailed(e.to_string()))?;
        self.file
            .sync_data()
            .map_err(|e| StorageError::AppendFailed(e.to_string()))?;
        Ok(())
    }

    /// Replay every record currently on disk, in append order. Used at
    /// startup to rebuild the in-memory index after a crash or restart.
    pub fn replay<T: DeserializeOwned>(&self) -> Result<Vec<T>, StorageError> {
        let file = File::open(&self.path).map_err(|e| StorageError::IndexCorrupt(e.to_string()))?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| StorageError::IndexCorrupt(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| {
                StorageError::IndexCorrupt(format!("line {lineno} in {:?}: {e}", self.path))
            })?;
            records.push(record);
        }
        Ok(records)
    }
}
