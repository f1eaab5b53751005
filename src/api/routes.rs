//! API Routes (§6): JSON-over-HTTP handlers for ingestion, cycle/reporting,
//! audit, and query endpoints, all sharing the process-wide `AppState`.

use std::collections::HashMap;

use axum::{
    extract::{Path as AxumPath, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coe_core::errors::AppError;
use coe_core::ingestion::IngestOutcome;
use coe_core::models::{
    Anomaly, CausalLink, EnterpriseContext, Event, Metric, NormalizedEvent, PolicyHit,
    Recommendation, SourceSignature,
};
use coe_core::scoring::RiskIndexSnapshot;

use crate::AppState;

fn outcome_response(outcome: IngestOutcome) -> axum::response::Response {
    match outcome {
        IngestOutcome::Accepted { event_id } => {
            (StatusCode::ACCEPTED, Json(serde_json::json!({ "status": "accepted", "event_id": event_id }))).into_response()
        }
        // Resubmission under the same idempotency key is not a conflict the
        // caller must resolve — it's expected under at-least-once delivery.
        IngestOutcome::Duplicate { event_id } => {
            (StatusCode::OK, Json(serde_json::json!({ "status": "duplicate", "event_id": event_id }))).into_response()
        }
        IngestOutcome::Quarantined { reason_code, diagnostics } => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "status": "quarantined", "reason_code": reason_code, "diagnostics": diagnostics })),
        )
            .into_response(),
    }
}

// ---- Ingestion endpoints ----

#[derive(Debug, Deserialize)]
pub struct EnvelopeRequest {
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

pub async fn ingest_envelope(
    AxumState(state): AxumState<AppState>,
    Json(body): Json<EnvelopeRequest>,
) -> Result<axum::response::Response, AppError> {
    let envelope = coe_core::models::Envelope {
        schema_version: body.schema_version,
        event_id: body.event_id,
        idempotency_key: body.idempotency_key,
        trace_id: body.trace_id,
        event_source_ts: body.event_source_ts,
        enterprise_context: body.enterprise_context,
        actor_context: body.actor_context,
        source_signature: body.source_signature,
        normalized_event: body.normalized_event,
    };
    let outcome = state.pipeline.submit_envelope(envelope)?;
    Ok(outcome_response(outcome))
}

#[derive(Debug, Deserialize)]
pub struct GithubWebhookRequest {
    pub idempotency_key: String,
    pub trace_id: String,
    pub enterprise_context: EnterpriseContext,
    pub repo: String,
    pub commit_sha: String,
    pub files_changed: u32,
    pub lines_changed: u64,
    #[serde(default)]
    pub coverage_delta_pct: Option<f64>,
    #[serde(default)]
    pub changed_files: Vec<String>,
}

pub async fn ingest_github_webhook(
    AxumState(state): AxumState<AppState>,
    Json(body): Json<GithubWebhookRequest>,
) -> Result<axum::response::Response, AppError> {
    let envelope = coe_core::ingestion::github_webhook_to_envelope(
        "1.0".to_string(),
        body.idempotency_key,
        body.trace_id,
        body.enterprise_context,
        SourceSignature { tool_name: "github".to_string(), tool_type: "webhook".to_string() },
        body.repo,
        body.commit_sha,
        body.files_changed,
        body.lines_changed,
        body.coverage_delta_pct,
        body.changed_files,
    );
    let outcome = state.pipeline.submit_github_webhook(envelope)?;
    Ok(outcome_response(outcome))
}

#[derive(Debug, Deserialize)]
pub struct RawEventRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub workflow_id: Option<String>,
    pub actor: String,
    pub resource: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub idempotency_key: Option<String>,
}

pub async fn observe_event(
    AxumState(state): AxumState<AppState>,
    Json(body): Json<RawEventRequest>,
) -> Result<axum::response::Response, AppError> {
    let event = Event {
        event_id: String::new(),
        event_type: body.event_type,
        workflow_id: body.workflow_id,
        actor: body.actor,
        resource: body.resource,
        timestamp: body.timestamp,
        metadata: body.metadata,
        observed_at: Utc::now(),
    };
    let outcome = state.pipeline.submit_raw_event(event, body.idempotency_key)?;
    Ok(outcome_response(outcome))
}

#[derive(Debug, Deserialize)]
pub struct RawMetricRequest {
    pub resource_id: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

pub async fn observe_metric(
    AxumState(state): AxumState<AppState>,
    Json(body): Json<RawMetricRequest>,
) -> Result<axum::response::Response, AppError> {
    let metric = Metric {
        metric_id: String::new(),
        resource_id: body.resource_id,
        metric_name: body.metric_name,
        value: body.value,
        timestamp: body.timestamp,
        observed_at: Utc::now(),
    };
    let outcome = state.pipeline.submit_raw_metric(metric, body.idempotency_key)?;
    Ok(outcome_response(outcome))
}

pub async fn ingest_status(AxumState(state): AxumState<AppState>) -> Json<coe_core::ingestion::IngestStatus> {
    Json(state.pipeline.status())
}

// ---- Cycle & reporting endpoints ----

#[derive(Debug, Serialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub degraded: bool,
    pub anomaly_count: usize,
    pub policy_hit_count: usize,
    pub risk_score: f64,
    pub band: String,
}

pub async fn trigger_cycle(AxumState(state): AxumState<AppState>) -> Json<CycleSummary> {
    let outcome = state.coordinator.run_cycle().await;
    Json(CycleSummary {
        cycle_id: outcome.cycle.cycle_id,
        degraded: outcome.cycle.degraded,
        anomaly_count: outcome.cycle.anomalies.len(),
        policy_hit_count: outcome.cycle.policy_hits.len(),
        risk_score: outcome.risk_snapshot.risk_score,
        band: format!("{:?}", outcome.risk_snapshot.band),
    })
}

fn latest_cycle(state: &AppState) -> Option<coe_core::models::Cycle> {
    state.blackboard.recent_cycles(1).into_iter().next()
}

pub async fn get_anomalies(AxumState(state): AxumState<AppState>) -> Json<Vec<Anomaly>> {
    Json(latest_cycle(&state).map(|c| c.anomalies).unwrap_or_default())
}

pub async fn get_policy_violations(AxumState(state): AxumState<AppState>) -> Json<Vec<PolicyHit>> {
    Json(latest_cycle(&state).map(|c| c.policy_hits).unwrap_or_default())
}

pub async fn get_causal_links(AxumState(state): AxumState<AppState>) -> Json<Vec<CausalLink>> {
    Json(latest_cycle(&state).map(|c| c.causal_links).unwrap_or_default())
}

pub async fn get_risk_index(AxumState(state): AxumState<AppState>) -> Json<Vec<RiskIndexSnapshot>> {
    Json(state.coordinator.risk_tracker().history())
}

pub async fn get_risk_current(AxumState(state): AxumState<AppState>) -> Result<Json<RiskIndexSnapshot>, StatusCode> {
    state.coordinator.risk_tracker().current().map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_recommendations(AxumState(state): AxumState<AppState>) -> Json<Vec<Recommendation>> {
    Json(latest_cycle(&state).map(|c| c.recommendations).unwrap_or_default())
}

// ---- Audit endpoints ----

pub async fn get_incident(
    AxumState(state): AxumState<AppState>,
    AxumPath(cycle_id): AxumPath<String>,
) -> Result<Json<coe_core::models::Cycle>, StatusCode> {
    state.blackboard.get_cycle(&cycle_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind")]
pub enum TimelineEntry {
    Anomaly { timestamp: DateTime<Utc>, anomaly_type: String, entity: String, confidence: f64 },
    PolicyHit { timestamp: DateTime<Utc>, policy_id: String, violation_type: coe_core::models::ViolationType },
    RiskSignal { timestamp: DateTime<Utc>, entity: String, projected_state: coe_core::models::RiskState },
}

pub async fn get_incident_timeline(
    AxumState(state): AxumState<AppState>,
    AxumPath(cycle_id): AxumPath<String>,
) -> Result<Json<Vec<TimelineEntry>>, StatusCode> {
    let cycle = state.blackboard.get_cycle(&cycle_id).ok_or(StatusCode::NOT_FOUND)?;
    let mut entries: Vec<TimelineEntry> = Vec::new();
    for a in &cycle.anomalies {
        entries.push(TimelineEntry::Anomaly {
            timestamp: a.timestamp,
            anomaly_type: a.anomaly_type.clone(),
            entity: a.entity.clone(),
            confidence: a.confidence,
        });
    }
    for h in &cycle.policy_hits {
        entries.push(TimelineEntry::PolicyHit { timestamp: h.timestamp, policy_id: h.policy_id.clone(), violation_type: h.violation_type });
    }
    for r in &cycle.risk_signals {
        entries.push(TimelineEntry::RiskSignal { timestamp: r.timestamp, entity: r.entity.clone(), projected_state: r.projected_state });
    }
    entries.sort_by_key(|e| match e {
        TimelineEntry::Anomaly { timestamp, .. } => *timestamp,
        TimelineEntry::PolicyHit { timestamp, .. } => *timestamp,
        TimelineEntry::RiskSignal { timestamp, .. } => *timestamp,
    });
    Ok(Json(entries))
}

// ---- Query endpoint ----

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub intent: String,
    pub answer: String,
    pub confidence: f64,
    pub evidence_count: usize,
    pub uncertainty: Option<String>,
}

pub async fn run_query(
    AxumState(state): AxumState<AppState>,
    Json(body): Json<QueryRequest>,
) -> Json<QueryResponse> {
    let answer = state.query_engine.answer(&body.query);
    Json(QueryResponse {
        intent: format!("{:?}", answer.intent),
        answer: answer.answer,
        confidence: answer.confidence,
        evidence_count: answer.evidence_count,
        uncertainty: answer.uncertainty,
    })
}

// ---- Liveness ----

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ingest/envelope", post(ingest_envelope))
        .route("/ingest/github/webhook", post(ingest_github_webhook))
        .route("/observe/event", post(observe_event))
        .route("/observe/metric", post(observe_metric))
        .route("/ingest/status", get(ingest_status))
        .route("/analysis/cycle", post(trigger_cycle))
        .route("/anomalies", get(get_anomalies))
        .route("/policy/violations", get(get_policy_violations))
        .route("/causal/links", get(get_causal_links))
        .route("/risk/index", get(get_risk_index))
        .route("/risk/current", get(get_risk_current))
        .route("/recommendations", get(get_recommendations))
        .route("/audit/incident/:id", get(get_incident))
        .route("/audit/incident/:id/timeline", get(get_incident_timeline))
        .route("/query", post(run_query))
        .route("/health", get(health))
}
