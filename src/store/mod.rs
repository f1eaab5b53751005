//! Observation Store (C1): the only durable record of raw facts. Events and
//! metrics are immutable once appended; nothing downstream — not even a
//! detection agent — may write back into it. `append_event`/`append_metric`
//! take the caller's name and enforce that it's the ingestion pipeline via
//! `guards::forbid_agent_event_emission`, so a future call site that tries
//! to write C1 from anywhere else (a detection agent handed a store
//! reference by mistake, say) fails loudly instead of silently.

mod index;
mod log;

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::errors::StorageError;
use crate::guards;
use crate::models::{Event, Metric};

pub use log::AppendLog;

/// The only caller identity `append_event`/`append_metric` accept.
const ALLOWED_CALLER: &str = "ingestion";

pub struct ObservationStore {
    events: RwLock<Vec<Event>>,
    metrics: RwLock<Vec<Metric>>,
    event_log: RwLock<AppendLog>,
    metric_log: RwLock<AppendLog>,
}

impl ObservationStore {
    /// Opens (or creates) the NDJSON logs under `data_dir` and replays them
    /// into memory, so a restart recovers the full observation history.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref();
        let event_log = AppendLog::open(data_dir.join("events.ndjson"))?;
        let metric_log = AppendLog::open(data_dir.join("metrics.ndjson"))?;

        let events: Vec<Event> = event_log.replay()?;
        let metrics: Vec<Metric> = metric_log.replay()?;

        Ok(Self {
            events: RwLock::new(events),
            metrics: RwLock::new(metrics),
            event_log: RwLock::new(event_log),
            metric_log: RwLock::new(metric_log),
        })
    }

    /// Durable before return: the record hits disk (and is fsynced) before
    /// this call yields. `caller` must be `"ingestion"` — anything else
    /// trips `guards::forbid_agent_event_emission`.
    pub fn append_event(&self, caller: &str, event: Event) -> Result<(), StorageError> {
        if caller != ALLOWED_CALLER {
            guards::forbid_agent_event_emission(caller);
        }
        self.event_log.write().append(&event)?;
        self.events.write().push(event);
        Ok(())
    }

    pub fn append_metric(&self, caller: &str, metric: Metric) -> Result<(), StorageError> {
        if caller != ALLOWED_CALLER {
            guards::forbid_agent_event_emission(caller);
        }
        self.metric_log.write().append(&metric)?;
        self.metrics.write().push(metric);
        Ok(())
    }

    /// Most recent `limit` events, reverse chronological (newest first).
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        let events = self.events.read();
        index::recent(&events, limit).into_iter().rev().cloned().collect()
    }

    /// Most recent `limit` metrics, reverse chronological (newest first).
    pub fn recent_metrics(&self, limit: usize) -> Vec<Metric> {
        let metrics = self.metrics.read();
        index::recent(&metrics, limit).into_iter().rev().cloned().collect()
    }

    pub fn event_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        event_type: Option<&str>,
        workflow_id: Option<&str>,
    ) -> Vec<Event> {
        let events = self.events.read();
        index::event_window(&events, from, to, event_type, workflow_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn metric_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resource_id: Option<&str>,
        metric_name: Option<&str>,
    ) -> Vec<Metric> {
        let metrics = self.metrics.read();
        index::metric_window(&metrics, from, to, resource_id, metric_name)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.read().len()
    }

    /// True if `id` is durably committed as either an event or a metric id.
    /// Used by the ingestion pipeline's startup reconciliation sweep to
    /// tell a completed append from one interrupted by a crash.
    pub fn contains_record_id(&self, id: &str) -> bool {
        self.events.read().iter().any(|e| e.event_id == id)
            || self.metrics.read().iter().any(|m| m.metric_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_event(id: &str, at: DateTime<Utc>) -> Event {
        Event {
            event_id: id.into(),
            event_type: "ACCESS_WRITE".into(),
            workflow_id: Some("wf-1".into()),
            actor: "tester".into(),
            resource: Some("res-1".into()),
            timestamp: at,
            metadata: HashMap::new(),
            observed_at: at,
        }
    }

    #[test]
    fn append_then_reopen_recovers_events() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();

        {
            let store = ObservationStore::open(dir.path()).unwrap();
            store.append_event("ingestion", sample_event("e1", now)).unwrap();
            store.append_event("ingestion", sample_event("e2", now)).unwrap();
            assert_eq!(store.event_count(), 2);
        }

        let reopened = ObservationStore::open(dir.path()).unwrap();
        assert_eq!(reopened.event_count(), 2);
        assert_eq!(reopened.recent_events(1)[0].event_id, "e2");
    }

    #[test]
    fn event_window_respects_type_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObservationStore::open(dir.path()).unwrap();
        let now = Utc::now();
        store.append_event("ingestion", sample_event("e1", now)).unwrap();

        let hits = store.event_window(
            now - chrono::Duration::seconds(1),
            now + chrono::Duration::seconds(1),
            Some("ACCESS_WRITE"),
            None,
        );
        assert_eq!(hits.len(), 1);

        let misses = store.event_window(
            now - chrono::Duration::seconds(1),
            now + chrono::Duration::seconds(1),
            Some("ACCESS_READ"),
            None,
        );
        assert!(misses.is_empty());
    }

    #[test]
    #[should_panic(expected = "AgentCannotEmitEvents")]
    fn append_event_rejects_a_non_ingestion_caller() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObservationStore::open(dir.path()).unwrap();
        let _ = store.append_event("WorkflowAgent", sample_event("e1", Utc::now()));
    }
}
