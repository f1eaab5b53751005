//! CodeAgent (§4.4.5): predictive anomalies over pre-deploy code-change and
//! CI events. Rule-based, not learned — correlates to runtime via
//! `deployment_id`/`trace_id` carried in the anomaly's metadata.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::errors::CycleError;
use crate::models::{new_id, Anomaly, Event};

use super::{DetectionAgent, ObservationSnapshot};

const NAME: &str = "CodeAgent";

pub struct CodeAgent {
    config: Arc<Config>,
}

impl CodeAgent {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

fn changed_files(event: &Event) -> Vec<String> {
    event
        .metadata
        .get("changed_files")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

#[async_trait]
impl DetectionAgent for CodeAgent {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn detect(
        &self,
        cycle_id: &str,
        snapshot: &ObservationSnapshot,
        blackboard: &crate::blackboard::Blackboard,
    ) -> Result<(), CycleError> {
        for event in snapshot.events_of_type("CODE_CHANGE") {
            let files_changed = event.metadata.get("files_changed").and_then(|v| v.as_u64()).unwrap_or(0);
            let lines_changed = event.metadata.get("lines_changed").and_then(|v| v.as_u64()).unwrap_or(0);
            let coverage_delta_pct = event.metadata.get("coverage_delta_pct").and_then(|v| v.as_f64());

            if files_changed >= 15 || lines_changed >= 800 {
                let confidence = (0.55 + 0.01 * (lines_changed as f64 / 50.0).min(35.0)).min(0.90);
                emit(
                    blackboard,
                    cycle_id,
                    "HIGH_CHURN",
                    event,
                    confidence,
                    format!("{files_changed} files / {lines_changed} lines changed in one commit"),
                )?;
            }

            if let Some(delta) = coverage_delta_pct {
                if delta < -3.0 {
                    let confidence = (0.60 + 0.05 * (-delta).min(6.0)).min(0.90);
                    emit(
                        blackboard,
                        cycle_id,
                        "COVERAGE_REGRESSION",
                        event,
                        confidence,
                        format!("coverage dropped {delta:.1}%"),
                    )?;
                }
            }

            let touched = changed_files(event);
            let hotspot_hits: Vec<&String> = touched
                .iter()
                .filter(|f| self.config.code_hotspot_files.contains(f))
                .collect();
            if !hotspot_hits.is_empty() {
                let confidence = if hotspot_hits.len() > 1 { 0.85 } else { 0.75 };
                emit(
                    blackboard,
                    cycle_id,
                    "HOTSPOT_OVERLAP",
                    event,
                    confidence,
                    format!("touches {} known hotspot file(s)", hotspot_hits.len()),
                )?;
            }
        }

        Ok(())
    }
}

fn emit(
    blackboard: &crate::blackboard::Blackboard,
    cycle_id: &str,
    anomaly_type: &str,
    event: &Event,
    confidence: f64,
    description: String,
) -> Result<(), CycleError> {
    let mut metadata = std::collections::HashMap::new();
    if let Some(commit_sha) = event.metadata.get("commit_sha") {
        metadata.insert("commit_sha".to_string(), commit_sha.clone());
    }
    metadata.insert("trace_id_source_event".to_string(), serde_json::json!(event.event_id));

    let anomaly = Anomaly {
        anomaly_id: new_id("anom"),
        anomaly_type: anomaly_type.to_string(),
        entity: event.resource.clone().unwrap_or_default(),
        confidence,
        agent: NAME.to_string(),
        evidence_ids: vec![event.event_id.clone()],
        description,
        metadata,
        timestamp: event.timestamp,
    };
    blackboard
        .append_anomaly(cycle_id, NAME, anomaly)
        .map_err(|e| CycleError::AgentFailure {
            agent: NAME.to_string(),
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use chrono::Utc;
    use std::collections::HashMap;

    fn code_change_event(files_changed: u64, lines_changed: u64, coverage_delta: Option<f64>) -> Event {
        let mut metadata = HashMap::new();
        metadata.insert("files_changed".to_string(), serde_json::json!(files_changed));
        metadata.insert("lines_changed".to_string(), serde_json::json!(lines_changed));
        if let Some(delta) = coverage_delta {
            metadata.insert("coverage_delta_pct".to_string(), serde_json::json!(delta));
        }
        metadata.insert("changed_files".to_string(), serde_json::json!(["src/core.rs"]));
        Event {
            event_id: "e1".into(),
            event_type: "CODE_CHANGE".into(),
            workflow_id: None,
            actor: "github_webhook".into(),
            resource: Some("acme/repo".into()),
            timestamp: Utc::now(),
            metadata,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn high_churn_and_coverage_regression_both_fire() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let handle = blackboard.start_cycle();
        let config = Arc::new(Config::default());

        let snapshot = ObservationSnapshot {
            taken_at: Utc::now(),
            events: vec![code_change_event(20, 1000, Some(-5.0))],
            metrics: vec![],
        };

        CodeAgent::new(config)
            .detect(&handle.cycle_id, &snapshot, &blackboard)
            .await
            .unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        let types: Vec<_> = sealed.anomalies.iter().map(|a| a.anomaly_type.clone()).collect();
        assert!(types.contains(&"HIGH_CHURN".to_string()));
        assert!(types.contains(&"COVERAGE_REGRESSION".to_string()));
    }

    #[tokio::test]
    async fn hotspot_overlap_uses_configured_hotspot_list() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let handle = blackboard.start_cycle();
        let mut config = Config::default();
        config.code_hotspot_files = vec!["src/core.rs".to_string()];

        let snapshot = ObservationSnapshot {
            taken_at: Utc::now(),
            events: vec![code_change_event(2, 50, None)],
            metrics: vec![],
        };

        CodeAgent::new(Arc::new(config))
            .detect(&handle.cycle_id, &snapshot, &blackboard)
            .await
            .unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert_eq!(sealed.anomalies.len(), 1);
        assert_eq!(sealed.anomalies[0].anomaly_type, "HOTSPOT_OVERLAP");
    }
}
