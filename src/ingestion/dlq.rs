//! Dead-letter queue: append-only record of every quarantined submission,
//! regardless of reason code.

use chrono::Utc;
use parking_lot::Mutex;

use crate::errors::StorageError;
use crate::models::{DlqReasonCode, DlqRecord};
use crate::store::AppendLog;

pub struct Dlq {
    log: Mutex<AppendLog>,
    counts: Mutex<DlqCounts>,
}

#[derive(Debug, Clone, Default)]
pub struct DlqCounts {
    pub schema_invalid: u64,
    pub duplicate: u64,
    pub late_event: u64,
}

impl Dlq {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let log = AppendLog::open(path)?;
        let counts = DlqCounts::default();
        Ok(Self {
            log: Mutex::new(log),
            counts: Mutex::new(counts),
        })
    }

    pub fn record(
        &self,
        envelope: serde_json::Value,
        reason_code: DlqReasonCode,
        diagnostics: String,
    ) -> Result<(), StorageError> {
        let record = DlqRecord {
            envelope,
            reason_code,
            received_at: Utc::now(),
            diagnostics,
        };
        self.log.lock().append(&record)?;

        let mut counts = self.counts.lock();
        match reason_code {
            DlqReasonCode::SchemaInvalid => counts.schema_invalid += 1,
            DlqReasonCode::Duplicate => counts.duplicate += 1,
            DlqReasonCode::LateEvent => counts.late_event += 1,
        }
        Ok(())
    }

    pub fn counts(&self) -> DlqCounts {
        self.counts.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_increments_matching_reason_counter() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = Dlq::open(dir.path().join("dlq.ndjson")).unwrap();

        dlq.record(
            serde_json::json!({"event_id": "e1"}),
            DlqReasonCode::Duplicate,
            "already seen".into(),
        )
        .unwrap();
        dlq.record(
            serde_json::json!({"event_id": "e2"}),
            DlqReasonCode::LateEvent,
            "48h stale".into(),
        )
        .unwrap();

        let counts = dlq.counts();
        assert_eq!(counts.duplicate, 1);
        assert_eq!(counts.late_event, 1);
        assert_eq!(counts.schema_invalid, 0);
    }
}
