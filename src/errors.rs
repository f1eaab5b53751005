//! Typed error taxonomy (§7). Ingestion errors resolve to DLQ reason codes;
//! cycle errors are confined to a single agent's section; invariant
//! violations bypass this taxonomy entirely and panic (see guards.rs).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::models::DlqReasonCode;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),
    #[error("event source timestamp outside accepted skew window: {0}")]
    LateEvent(String),
    #[error("category payload invalid: {0}")]
    CategoryInvalid(String),
}

impl ValidationError {
    pub fn reason_code(&self) -> DlqReasonCode {
        match self {
            ValidationError::SchemaInvalid(_) => DlqReasonCode::SchemaInvalid,
            ValidationError::LateEvent(_) => DlqReasonCode::LateEvent,
            ValidationError::CategoryInvalid(_) => DlqReasonCode::SchemaInvalid,
        }
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("agent {agent} timed out after {deadline_ms}ms")]
    AgentTimeout { agent: String, deadline_ms: u64 },
    #[error("agent {agent} failed: {detail}")]
    AgentFailure { agent: String, detail: String },
}

impl CycleError {
    pub fn agent(&self) -> &str {
        match self {
            CycleError::AgentTimeout { agent, .. } => agent,
            CycleError::AgentFailure { agent, .. } => agent,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::AgentTimeout { .. } => "AgentTimeout",
            CycleError::AgentFailure { .. } => "AgentFailure",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("append failed: {0}")]
    AppendFailed(String),
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),
}

/// Top-level application error mapped to an HTTP response at the API
/// boundary. Ingestion validation outcomes are *not* represented here —
/// `Submit` returns a structured `IngestOutcome` instead of an `Err`, since
/// a quarantine is an expected domain outcome, not a failure (§7).
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Storage(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Other(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
