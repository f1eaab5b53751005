//! Scenario Injector (C9): a deterministic, HTTP-independent front door onto
//! the Ingestion Pipeline for tests and demos. Every injected spec goes
//! through the same `Submit` path as an externally-received envelope — no
//! gate is bypassed here.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::StorageError;
use crate::ingestion::{IngestOutcome, IngestionPipeline};
use crate::models::{new_id, EnterpriseContext, Envelope, NormalizedEvent, SourceSignature};

/// Caller-supplied fields for one synthetic event. Anything the Envelope
/// requires but a demo narrative doesn't care about gets an injector
/// default (fresh ids, "now" timestamp, a synthetic tenant).
#[derive(Debug, Clone)]
pub struct EventSpec {
    pub event_type: String,
    pub workflow_id: Option<String>,
    pub actor: String,
    pub resource: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub event_source_ts: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MetricSpec {
    pub resource_id: String,
    pub metric_name: String,
    pub value: f64,
    pub event_source_ts: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub enum InjectSpec {
    Event(EventSpec),
    Metric(MetricSpec),
}

fn default_enterprise_context() -> EnterpriseContext {
    EnterpriseContext { org: "demo-org".to_string(), project: "demo-project".to_string(), env: "demo".to_string(), deployment_id: None }
}

fn default_source_signature() -> SourceSignature {
    SourceSignature { tool_name: "scenario-injector".to_string(), tool_type: "synthetic".to_string() }
}

fn envelope_for_event(spec: EventSpec) -> Envelope {
    Envelope {
        schema_version: "1.0".to_string(),
        event_id: new_id("evt"),
        idempotency_key: spec.idempotency_key.unwrap_or_else(|| new_id("idem")),
        trace_id: new_id("trace"),
        event_source_ts: spec.event_source_ts.unwrap_or_else(Utc::now),
        enterprise_context: default_enterprise_context(),
        actor_context: spec.actor.clone(),
        source_signature: default_source_signature(),
        normalized_event: NormalizedEvent::Event {
            event_type: spec.event_type,
            workflow_id: spec.workflow_id,
            actor: spec.actor,
            resource: spec.resource,
            metadata: spec.metadata,
        },
    }
}

fn envelope_for_metric(spec: MetricSpec) -> Envelope {
    Envelope {
        schema_version: "1.0".to_string(),
        event_id: new_id("evt"),
        idempotency_key: spec.idempotency_key.unwrap_or_else(|| new_id("idem")),
        trace_id: new_id("trace"),
        event_source_ts: spec.event_source_ts.unwrap_or_else(Utc::now),
        enterprise_context: default_enterprise_context(),
        actor_context: "scenario-injector".to_string(),
        source_signature: default_source_signature(),
        normalized_event: NormalizedEvent::Metric { resource_id: spec.resource_id, metric_name: spec.metric_name, value: spec.value },
    }
}

pub struct ScenarioInjector {
    pipeline: Arc<IngestionPipeline>,
}

impl ScenarioInjector {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn inject_event(&self, spec: EventSpec) -> Result<IngestOutcome, StorageError> {
        self.pipeline.submit_envelope(envelope_for_event(spec))
    }

    pub fn inject_metric(&self, spec: MetricSpec) -> Result<IngestOutcome, StorageError> {
        self.pipeline.submit_envelope(envelope_for_metric(spec))
    }

    /// Submits every spec in caller order, sequentially — not concurrently
    /// — so insertion order into the Observation Store is deterministic.
    pub fn inject_sequence(&self, specs: Vec<InjectSpec>) -> Result<Vec<IngestOutcome>, StorageError> {
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            let outcome = match spec {
                InjectSpec::Event(e) => self.inject_event(e)?,
                InjectSpec::Metric(m) => self.inject_metric(m)?,
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::ObservationStore;

    fn injector(dir: &std::path::Path) -> ScenarioInjector {
        let config = Arc::new(Config::default());
        let store = Arc::new(ObservationStore::open(dir).unwrap());
        let pipeline = Arc::new(IngestionPipeline::open(dir, store, config).unwrap());
        ScenarioInjector::new(pipeline)
    }

    #[test]
    fn inject_sequence_preserves_caller_order() {
        let dir = tempfile::tempdir().unwrap();
        let injector = injector(dir.path());

        let specs = vec![
            InjectSpec::Metric(MetricSpec {
                resource_id: "vm_2".into(),
                metric_name: "cpu_percent".into(),
                value: 72.0,
                event_source_ts: None,
                idempotency_key: None,
            }),
            InjectSpec::Metric(MetricSpec {
                resource_id: "vm_2".into(),
                metric_name: "cpu_percent".into(),
                value: 88.0,
                event_source_ts: None,
                idempotency_key: None,
            }),
        ];

        let outcomes = injector.inject_sequence(specs).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], IngestOutcome::Accepted { .. }));
        assert!(matches!(outcomes[1], IngestOutcome::Accepted { .. }));
    }

    #[test]
    fn inject_event_goes_through_the_same_gates_as_external_submit() {
        let dir = tempfile::tempdir().unwrap();
        let injector = injector(dir.path());

        let stale = EventSpec {
            event_type: "ACCESS_WRITE".into(),
            workflow_id: None,
            actor: "svc_bot".into(),
            resource: Some("config".into()),
            metadata: Default::default(),
            event_source_ts: Some(Utc::now() - chrono::Duration::hours(48)),
            idempotency_key: None,
        };

        let outcome = injector.inject_event(stale).unwrap();
        assert!(matches!(outcome, IngestOutcome::Quarantined { .. }));
    }
}
