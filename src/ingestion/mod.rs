//! Ingestion Pipeline (C2): the single gate through which all raw facts
//! enter the system. `Submit` never partially applies — either C1 gets one
//! durable append or the DLQ gets one durable record, never both, never
//! neither.

mod dlq;
mod envelope;
mod idempotency;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;
use crate::errors::StorageError;
use crate::models::{new_id, DlqReasonCode, Envelope, Event, Metric, NormalizedEvent};
use crate::store::ObservationStore;

pub use dlq::DlqCounts;

/// The only caller `ObservationStore::append_event`/`append_metric` accept
/// — anything else trips `guards::forbid_agent_event_emission`.
const INGESTION_CALLER: &str = "ingestion";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted { event_id: String },
    Duplicate { event_id: String },
    Quarantined { reason_code: DlqReasonCode, diagnostics: String },
}

pub struct IngestionPipeline {
    store: Arc<ObservationStore>,
    idempotency: idempotency::IdempotencyIndex,
    dlq: dlq::Dlq,
    config: Arc<Config>,
    accepted: AtomicU64,
}

impl IngestionPipeline {
    pub fn open(
        data_dir: impl AsRef<Path>,
        store: Arc<ObservationStore>,
        config: Arc<Config>,
    ) -> Result<Self, StorageError> {
        let dlq = dlq::Dlq::open(data_dir.as_ref().join("dlq.ndjson"))?;
        let idempotency = idempotency::IdempotencyIndex::open(data_dir.as_ref().join("idempotency.ndjson"))?;

        // Startup reconciliation sweep: a reservation whose event/metric id
        // never landed in the Observation Store means the process crashed
        // between reserving the key and committing the append. The original
        // envelope isn't retained anywhere, so completing the append isn't
        // an option — release the reservation and let the caller's
        // at-least-once retry resubmit it.
        idempotency.reconcile(|id| store.contains_record_id(id));

        Ok(Self {
            store,
            idempotency,
            dlq,
            config,
            accepted: AtomicU64::new(0),
        })
    }

    /// §4.1 full envelope path: schema gate, idempotency gate, skew gate,
    /// category gate, tenant derivation, normalization, C1 append.
    pub fn submit_envelope(&self, envelope: Envelope) -> Result<IngestOutcome, StorageError> {
        if let Err(e) = envelope::validate_schema(&envelope, &self.config.schema_accept_majors) {
            warn!(event_id = %envelope.event_id, "SchemaInvalid: {e}");
            return self.quarantine(&envelope, DlqReasonCode::SchemaInvalid, e.to_string());
        }

        if let Some(existing) = self.idempotency.peek(&envelope.idempotency_key) {
            warn!(idempotency_key = %envelope.idempotency_key, "Duplicate submission");
            self.dlq.record(
                serde_json::to_value(&envelope).unwrap_or_default(),
                DlqReasonCode::Duplicate,
                format!("idempotency_key already bound to event {}", existing.event_id),
            )?;
            return Ok(IngestOutcome::Duplicate { event_id: existing.event_id });
        }

        if let Err(e) = envelope::validate_skew(
            envelope.event_source_ts,
            Utc::now(),
            self.config.skew_past,
            self.config.skew_future,
        ) {
            warn!(event_id = %envelope.event_id, "LateEvent: {e}");
            return self.quarantine(&envelope, DlqReasonCode::LateEvent, e.to_string());
        }

        if let Err(e) = envelope::validate_category(&envelope.normalized_event) {
            warn!(event_id = %envelope.event_id, "CategoryInvalid: {e}");
            return self.quarantine(&envelope, DlqReasonCode::SchemaInvalid, e.to_string());
        }

        if envelope::carries_severity_field(&envelope.normalized_event) {
            crate::guards::forbid_severity_at_ingestion(&envelope.event_id);
        }

        // Tenant derivation is carried on every normalized Event's metadata
        // via the enterprise_context the caller already attached; no
        // additional storage is required beyond what normalize() produces.
        let _tenant_key = envelope.enterprise_context.tenant_key();

        if !self.idempotency.reserve(&envelope.idempotency_key, &envelope.event_id) {
            // Lost a race against a concurrent submit of the same key.
            let existing = self.idempotency.peek(&envelope.idempotency_key).unwrap();
            return Ok(IngestOutcome::Duplicate { event_id: existing.event_id });
        }

        let (event, metric) = envelope::normalize(&envelope, Utc::now());
        if let Err(e) = self.store.append_event(INGESTION_CALLER, event.clone()) {
            self.idempotency.release(&envelope.idempotency_key);
            return Err(e);
        }
        if let Some(metric) = metric {
            if let Err(e) = self.store.append_metric(INGESTION_CALLER, metric) {
                self.idempotency.release(&envelope.idempotency_key);
                return Err(e);
            }
        }

        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(IngestOutcome::Accepted { event_id: event.event_id })
    }

    /// `/observe/event`: bypasses the schema gate but still runs idempotency
    /// and skew (§4.1 "Raw ingest endpoints").
    pub fn submit_raw_event(
        &self,
        mut event: Event,
        idempotency_key: Option<String>,
    ) -> Result<IngestOutcome, StorageError> {
        if event.event_id.is_empty() {
            event.event_id = new_id("evt");
        }
        if event.metadata.contains_key("severity") {
            crate::guards::forbid_severity_at_ingestion(&event.event_id);
        }
        let key = idempotency_key.unwrap_or_else(|| raw_event_key(&event));

        if let Some(existing) = self.idempotency.peek(&key) {
            return Ok(IngestOutcome::Duplicate { event_id: existing.event_id });
        }
        if let Err(e) = envelope::validate_skew(
            event.timestamp,
            Utc::now(),
            self.config.skew_past,
            self.config.skew_future,
        ) {
            warn!(event_id = %event.event_id, "LateEvent on raw submit: {e}");
            self.dlq.record(
                serde_json::to_value(&event).unwrap_or_default(),
                DlqReasonCode::LateEvent,
                e.to_string(),
            )?;
            return Ok(IngestOutcome::Quarantined {
                reason_code: DlqReasonCode::LateEvent,
                diagnostics: e.to_string(),
            });
        }
        if !self.idempotency.reserve(&key, &event.event_id) {
            let existing = self.idempotency.peek(&key).unwrap();
            return Ok(IngestOutcome::Duplicate { event_id: existing.event_id });
        }

        event.observed_at = Utc::now();
        if let Err(e) = self.store.append_event(INGESTION_CALLER, event.clone()) {
            self.idempotency.release(&key);
            return Err(e);
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(IngestOutcome::Accepted { event_id: event.event_id })
    }

    /// `/observe/metric`: same bypass rule as `submit_raw_event`.
    pub fn submit_raw_metric(
        &self,
        mut metric: Metric,
        idempotency_key: Option<String>,
    ) -> Result<IngestOutcome, StorageError> {
        if metric.metric_id.is_empty() {
            metric.metric_id = new_id("met");
        }
        let key = idempotency_key.unwrap_or_else(|| raw_metric_key(&metric));

        if let Some(existing) = self.idempotency.peek(&key) {
            return Ok(IngestOutcome::Duplicate { event_id: existing.event_id });
        }
        if let Err(e) = envelope::validate_skew(
            metric.timestamp,
            Utc::now(),
            self.config.skew_past,
            self.config.skew_future,
        ) {
            warn!(metric_id = %metric.metric_id, "LateEvent on raw submit: {e}");
            self.dlq.record(
                serde_json::to_value(&metric).unwrap_or_default(),
                DlqReasonCode::LateEvent,
                e.to_string(),
            )?;
            return Ok(IngestOutcome::Quarantined {
                reason_code: DlqReasonCode::LateEvent,
                diagnostics: e.to_string(),
            });
        }
        if !self.idempotency.reserve(&key, &metric.metric_id) {
            let existing = self.idempotency.peek(&key).unwrap();
            return Ok(IngestOutcome::Duplicate { event_id: existing.event_id });
        }

        metric.observed_at = Utc::now();
        if let Err(e) = self.store.append_metric(INGESTION_CALLER, metric.clone()) {
            self.idempotency.release(&key);
            return Err(e);
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(IngestOutcome::Accepted { event_id: metric.metric_id })
    }

    /// Maps a GitHub webhook payload onto the Envelope shape (§4.1) before
    /// running it through the identical `submit_envelope` path.
    pub fn submit_github_webhook(
        &self,
        envelope: Envelope,
    ) -> Result<IngestOutcome, StorageError> {
        self.submit_envelope(envelope)
    }

    pub fn status(&self) -> IngestStatus {
        IngestStatus {
            accepted: self.accepted.load(Ordering::Relaxed),
            quarantined: self.dlq.counts(),
        }
    }

    fn quarantine(
        &self,
        envelope: &Envelope,
        reason_code: DlqReasonCode,
        diagnostics: String,
    ) -> Result<IngestOutcome, StorageError> {
        self.dlq.record(
            serde_json::to_value(envelope).unwrap_or_default(),
            reason_code,
            diagnostics.clone(),
        )?;
        Ok(IngestOutcome::Quarantined { reason_code, diagnostics })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    pub accepted: u64,
    pub quarantined: DlqCounts,
}

fn raw_event_key(event: &Event) -> String {
    format!(
        "raw-event:{}:{}:{}",
        event.event_type,
        event.actor,
        event.timestamp.to_rfc3339()
    )
}

fn raw_metric_key(metric: &Metric) -> String {
    format!(
        "raw-metric:{}:{}:{}",
        metric.resource_id,
        metric.metric_name,
        metric.timestamp.to_rfc3339()
    )
}

/// Maps a code/CI webhook body onto an Envelope's `normalized_event`,
/// carrying commit/PR/coverage fields under documented metadata keys
/// (§4.1, primary input to the CodeAgent per §4.4.5).
pub fn github_webhook_to_envelope(
    schema_version: String,
    idempotency_key: String,
    trace_id: String,
    enterprise_context: crate::models::EnterpriseContext,
    source_signature: crate::models::SourceSignature,
    repo: String,
    commit_sha: String,
    files_changed: u32,
    lines_changed: u64,
    coverage_delta_pct: Option<f64>,
    changed_files: Vec<String>,
) -> Envelope {
    let mut metadata = std::collections::HashMap::new();
    metadata.insert("repo".to_string(), serde_json::json!(repo));
    metadata.insert("commit_sha".to_string(), serde_json::json!(commit_sha));
    metadata.insert("files_changed".to_string(), serde_json::json!(files_changed));
    metadata.insert("lines_changed".to_string(), serde_json::json!(lines_changed));
    if let Some(delta) = coverage_delta_pct {
        metadata.insert("coverage_delta_pct".to_string(), serde_json::json!(delta));
    }
    metadata.insert("changed_files".to_string(), serde_json::json!(changed_files));

    Envelope {
        schema_version,
        event_id: new_id("evt"),
        idempotency_key,
        trace_id,
        event_source_ts: Utc::now(),
        enterprise_context,
        actor_context: "github_webhook".to_string(),
        source_signature,
        normalized_event: NormalizedEvent::Event {
            event_type: "CODE_CHANGE".to_string(),
            workflow_id: None,
            actor: "github_webhook".to_string(),
            resource: Some(repo),
            metadata,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnterpriseContext;
    use crate::models::SourceSignature;
    use std::collections::HashMap;

    fn pipeline() -> (IngestionPipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config::default());
        let store = Arc::new(ObservationStore::open(dir.path()).unwrap());
        let pipeline = IngestionPipeline::open(dir.path(), store, config).unwrap();
        (pipeline, dir)
    }

    fn envelope_with_key(key: &str) -> Envelope {
        Envelope {
            schema_version: "1.0".into(),
            event_id: new_id("evt"),
            idempotency_key: key.into(),
            trace_id: "t1".into(),
            event_source_ts: Utc::now(),
            enterprise_context: EnterpriseContext {
                org: "acme".into(),
                project: "payments".into(),
                env: "prod".into(),
                deployment_id: None,
            },
            actor_context: "svc_bot".into(),
            source_signature: SourceSignature {
                tool_name: "scanner".into(),
                tool_type: "static".into(),
            },
            normalized_event: NormalizedEvent::Event {
                event_type: "ACCESS_WRITE".into(),
                workflow_id: None,
                actor: "svc_bot".into(),
                resource: Some("config".into()),
                metadata: HashMap::new(),
            },
        }
    }

    #[test]
    fn duplicate_submission_is_quarantined_and_store_holds_one_record() {
        let (pipeline, _dir) = pipeline();
        let envelope = envelope_with_key("K");

        let first = pipeline.submit_envelope(envelope.clone()).unwrap();
        assert!(matches!(first, IngestOutcome::Accepted { .. }));

        let second = pipeline.submit_envelope(envelope).unwrap();
        assert!(matches!(second, IngestOutcome::Duplicate { .. }));

        assert_eq!(pipeline.status().accepted, 1);
        assert_eq!(pipeline.status().quarantined.duplicate, 1);
    }

    #[test]
    fn late_event_is_quarantined_without_store_append() {
        let (pipeline, _dir) = pipeline();
        let mut envelope = envelope_with_key("K2");
        envelope.event_source_ts = Utc::now() - chrono::Duration::hours(48);

        let outcome = pipeline.submit_envelope(envelope).unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::Quarantined { reason_code: DlqReasonCode::LateEvent, .. }
        ));
        assert_eq!(pipeline.status().accepted, 0);
    }

    #[test]
    fn unaccepted_schema_major_is_quarantined() {
        let (pipeline, _dir) = pipeline();
        let mut envelope = envelope_with_key("K3");
        envelope.schema_version = "9.0".into();

        let outcome = pipeline.submit_envelope(envelope).unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::Quarantined { reason_code: DlqReasonCode::SchemaInvalid, .. }
        ));
    }
}
