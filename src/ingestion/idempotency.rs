//! Idempotency gate (§4.1 step 2). Keys are hash-partitioned across a fixed
//! number of shards so concurrent submits under different keys don't
//! contend on one lock, while submits under the same key serialize through
//! their shard.
//!
//! Reservations and releases are appended to a durable log before the
//! in-memory shard is mutated, the same "durable before return" rule
//! `ObservationStore` follows. `open()` replays that log so a restart
//! doesn't forget keys it already bound, and `reconcile` runs the startup
//! sweep: a reservation whose event was never durably committed to the
//! Observation Store is released, since the original envelope isn't
//! retained anywhere to replay the append itself.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;
use crate::models::IdempotencyRecord;
use crate::store::AppendLog;

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum IdempotencyLogEntry {
    Reserved(IdempotencyRecord),
    Released { idempotency_key: String },
}

pub struct IdempotencyIndex {
    shards: Vec<RwLock<HashMap<String, IdempotencyRecord>>>,
    log: Mutex<AppendLog>,
}

impl IdempotencyIndex {
    /// Opens (or creates) the durable log under `path` and replays it,
    /// reconstructing the shard state a prior process left behind.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let log = AppendLog::open(path)?;
        let entries: Vec<IdempotencyLogEntry> = log.replay()?;

        let shards: Vec<RwLock<HashMap<String, IdempotencyRecord>>> =
            (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect();
        let index = Self { shards, log: Mutex::new(log) };

        for entry in entries {
            match entry {
                IdempotencyLogEntry::Reserved(record) => {
                    index.shard_for(&record.idempotency_key).write().insert(record.idempotency_key.clone(), record);
                }
                IdempotencyLogEntry::Released { idempotency_key } => {
                    index.shard_for(&idempotency_key).write().remove(&idempotency_key);
                }
            }
        }
        Ok(index)
    }

    fn shard_for(&self, key: &str) -> &RwLock<HashMap<String, IdempotencyRecord>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Looks up `key`; returns the existing record if this is a duplicate.
    pub fn peek(&self, key: &str) -> Option<IdempotencyRecord> {
        self.shard_for(key).read().get(key).cloned()
    }

    /// Atomically reserves `key` for `event_id`. Returns `false` (and does
    /// not overwrite) if the key was already reserved — the caller treats
    /// that as DUPLICATE.
    pub fn reserve(&self, key: &str, event_id: &str) -> bool {
        let mut shard = self.shard_for(key).write();
        if shard.contains_key(key) {
            return false;
        }
        let record = IdempotencyRecord {
            idempotency_key: key.to_string(),
            first_seen_at: Utc::now(),
            event_id: event_id.to_string(),
        };
        if self.log.lock().append(&IdempotencyLogEntry::Reserved(record.clone())).is_err() {
            return false;
        }
        shard.insert(key.to_string(), record);
        true
    }

    /// Releases a reservation made by `reserve` when the subsequent C1
    /// append fails, per the rollback-on-failure rule in §4.1.
    pub fn release(&self, key: &str) {
        let _ = self.log.lock().append(&IdempotencyLogEntry::Released { idempotency_key: key.to_string() });
        self.shard_for(key).write().remove(key);
    }

    /// Startup reconciliation sweep: releases any reservation whose
    /// event/metric id never made it into a durable commit, per
    /// `is_committed`. Without the original envelope retained, completing
    /// the append isn't possible — the caller's at-least-once retry will
    /// resubmit and be accepted fresh once the reservation is gone.
    pub fn reconcile<F: Fn(&str) -> bool>(&self, is_committed: F) {
        for shard in &self.shards {
            let stale_keys: Vec<String> = shard
                .read()
                .values()
                .filter(|record| !is_committed(&record.event_id))
                .map(|record| record.idempotency_key.clone())
                .collect();
            for key in stale_keys {
                self.release(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_rejects_duplicate_key() {
        let dir = tempfile::tempdir().unwrap();
        let idx = IdempotencyIndex::open(dir.path().join("idempotency.ndjson")).unwrap();
        assert!(idx.reserve("k1", "e1"));
        assert!(!idx.reserve("k1", "e2"));
        assert_eq!(idx.peek("k1").unwrap().event_id, "e1");
    }

    #[test]
    fn release_allows_reuse_after_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let idx = IdempotencyIndex::open(dir.path().join("idempotency.ndjson")).unwrap();
        assert!(idx.reserve("k1", "e1"));
        idx.release("k1");
        assert!(idx.reserve("k1", "e2"));
        assert_eq!(idx.peek("k1").unwrap().event_id, "e2");
    }

    #[test]
    fn reopen_replays_reservations_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idempotency.ndjson");
        {
            let idx = IdempotencyIndex::open(&path).unwrap();
            assert!(idx.reserve("k1", "e1"));
        }
        let reopened = IdempotencyIndex::open(&path).unwrap();
        assert_eq!(reopened.peek("k1").unwrap().event_id, "e1");
    }

    #[test]
    fn reopen_replays_release_as_a_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idempotency.ndjson");
        {
            let idx = IdempotencyIndex::open(&path).unwrap();
            assert!(idx.reserve("k1", "e1"));
            idx.release("k1");
        }
        let reopened = IdempotencyIndex::open(&path).unwrap();
        assert!(reopened.peek("k1").is_none());
    }

    #[test]
    fn reconcile_releases_reservations_with_no_matching_commit() {
        let dir = tempfile::tempdir().unwrap();
        let idx = IdempotencyIndex::open(dir.path().join("idempotency.ndjson")).unwrap();
        assert!(idx.reserve("k1", "e1"));
        assert!(idx.reserve("k2", "e2"));

        idx.reconcile(|event_id| event_id == "e2");

        assert!(idx.peek("k1").is_none());
        assert!(idx.peek("k2").is_some());
    }
}
