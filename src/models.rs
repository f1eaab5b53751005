//! Core data model: events, metrics, envelopes, and the cycle artifact types
//! that flow between the ingestion pipeline, the observation store, and the
//! blackboard.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}

/// A raw, immutable fact ingested from telemetry. Events carry no severity
/// or verdict — scoring is layered on top by the reasoning cycle, never by
/// ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub workflow_id: Option<String>,
    pub actor: String,
    pub resource: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub observed_at: DateTime<Utc>,
}

/// A raw, immutable numeric sample ingested from telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub metric_id: String,
    pub resource_id: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterpriseContext {
    pub org: String,
    pub project: String,
    pub env: String,
    pub deployment_id: Option<String>,
}

impl EnterpriseContext {
    pub fn tenant_key(&self) -> String {
        format!("{}:{}:{}", self.org, self.project, self.env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSignature {
    pub tool_name: String,
    pub tool_type: String,
}

/// Category-specific payload carried by an envelope's `normalized_event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum NormalizedEvent {
    Event {
        #[serde(rename = "type")]
        event_type: String,
        workflow_id: Option<String>,
        actor: String,
        resource: Option<String>,
        #[serde(default)]
        metadata: HashMap<String, serde_json::Value>,
    },
    Metric {
        resource_id: String,
        metric_name: String,
        value: f64,
    },
}

/// The external ingestion payload. `Submit` validates this in the fixed
/// order (schema, idempotency, skew, category) and never partially applies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: String,
    pub event_id: String,
    pub idempotency_key: String,
    pub trace_id: String,
    pub event_source_ts: DateTime<Utc>,
    pub enterprise_context: EnterpriseContext,
    pub actor_context: String,
    pub source_signature: SourceSignature,
    pub normalized_event: NormalizedEvent,
}

impl Envelope {
    /// Major version component of `schema_version`, e.g. "1" from "1.2".
    pub fn schema_major(&self) -> Option<u32> {
        self.schema_version.split('.').next()?.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub predicate: String,
    pub severity: Severity,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_id: String,
    pub anomaly_type: String,
    pub entity: String,
    pub confidence: f64,
    pub agent: String,
    pub evidence_ids: Vec<String>,
    pub description: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ViolationType {
    Silent,
    Explicit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyHit {
    pub hit_id: String,
    pub policy_id: String,
    pub event_id: String,
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub evidence_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskState {
    Normal,
    Degraded,
    AtRisk,
    Violation,
    Incident,
}

impl RiskState {
    /// §4.5.1 mapping from total_issues to projected risk state.
    pub fn from_total_issues(total_issues: u32) -> Self {
        match total_issues {
            0 => RiskState::Normal,
            1 => RiskState::Degraded,
            2..=3 => RiskState::AtRisk,
            4..=5 => RiskState::Violation,
            _ => RiskState::Incident,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSignal {
    pub entity: String,
    pub current_state: RiskState,
    pub projected_state: RiskState,
    pub confidence: f64,
    pub time_horizon: String,
    pub evidence_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalLink {
    pub link_id: String,
    pub cause_type: String,
    pub effect_type: String,
    pub confidence: f64,
    pub temporal_distance_seconds: f64,
    pub reasoning: String,
    pub evidence_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeverityLabel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityScore {
    pub target_id: String,
    pub base_score: f64,
    pub weighted_delta: f64,
    pub final_score: f64,
    pub label: SeverityLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub rec_id: String,
    pub cause_key: String,
    pub action: String,
    pub urgency: Urgency,
    pub rationale: String,
    pub confidence: f64,
    pub evidence_ids: Vec<String>,
}

/// A per-agent failure annotation recorded on a cycle when a Phase-1/2/3
/// agent times out or errors. Never fatal — see guards.rs for the
/// process-halting counterpart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleFailure {
    pub agent: String,
    pub kind: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleState {
    Open,
    Sealed,
}

/// One end-to-end reasoning pass. Append-only while `Open`; byte-stable
/// once `Sealed`. `cycle_sha256` is computed over the sealed payload at
/// seal time and never recomputed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub cycle_id: String,
    pub state: CycleState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub anomalies: Vec<Anomaly>,
    pub policy_hits: Vec<PolicyHit>,
    pub risk_signals: Vec<RiskSignal>,
    pub causal_links: Vec<CausalLink>,
    pub severity_scores: Vec<SeverityScore>,
    pub recommendations: Vec<Recommendation>,
    pub failures: Vec<CycleFailure>,
    pub degraded: bool,
    pub cycle_sha256: Option<String>,
}

impl Cycle {
    pub fn new(cycle_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            state: CycleState::Open,
            started_at,
            completed_at: None,
            anomalies: Vec::new(),
            policy_hits: Vec::new(),
            risk_signals: Vec::new(),
            causal_links: Vec::new(),
            severity_scores: Vec::new(),
            recommendations: Vec::new(),
            failures: Vec::new(),
            degraded: false,
            cycle_sha256: None,
        }
    }

    pub fn policy_violation_count(&self) -> usize {
        self.policy_hits.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub first_seen_at: DateTime<Utc>,
    pub event_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DlqReasonCode {
    SchemaInvalid,
    Duplicate,
    LateEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRecord {
    pub envelope: serde_json::Value,
    pub reason_code: DlqReasonCode,
    pub received_at: DateTime<Utc>,
    pub diagnostics: String,
}

/// Per `(entity, metric)` rolling statistics used by the adaptive baseline
/// agent. Updated only when a sample is within the deviation threshold —
/// see agents::baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineProfile {
    pub entity: String,
    pub metric_name: String,
    pub mean: f64,
    pub variance: f64,
    pub sample_count: u32,
}

impl BaselineProfile {
    pub fn new(entity: String, metric_name: String) -> Self {
        Self {
            entity,
            metric_name,
            mean: 0.0,
            variance: 0.0,
            sample_count: 0,
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_key_composes_org_project_env() {
        let ctx = EnterpriseContext {
            org: "acme".into(),
            project: "payments".into(),
            env: "prod".into(),
            deployment_id: None,
        };
        assert_eq!(ctx.tenant_key(), "acme:payments:prod");
    }

    #[test]
    fn risk_state_mapping_matches_spec() {
        assert_eq!(RiskState::from_total_issues(0), RiskState::Normal);
        assert_eq!(RiskState::from_total_issues(1), RiskState::Degraded);
        assert_eq!(RiskState::from_total_issues(2), RiskState::AtRisk);
        assert_eq!(RiskState::from_total_issues(3), RiskState::AtRisk);
        assert_eq!(RiskState::from_total_issues(4), RiskState::Violation);
        assert_eq!(RiskState::from_total_issues(5), RiskState::Violation);
        assert_eq!(RiskState::from_total_issues(6), RiskState::Incident);
        assert_eq!(RiskState::from_total_issues(100), RiskState::Incident);
    }

    #[test]
    fn schema_major_parses_leading_component() {
        let env = Envelope {
            schema_version: "1.4".into(),
            event_id: "e1".into(),
            idempotency_key: "k1".into(),
            trace_id: "t1".into(),
            event_source_ts: Utc::now(),
            enterprise_context: EnterpriseContext {
                org: "o".into(),
                project: "p".into(),
                env: "e".into(),
                deployment_id: None,
            },
            actor_context: "a".into(),
            source_signature: SourceSignature {
                tool_name: "tool".into(),
                tool_type: "scanner".into(),
            },
            normalized_event: NormalizedEvent::Event {
                event_type: "ACCESS_WRITE".into(),
                workflow_id: None,
                actor: "a".into(),
                resource: None,
                metadata: HashMap::new(),
            },
        };
        assert_eq!(env.schema_major(), Some(1));
    }
}
