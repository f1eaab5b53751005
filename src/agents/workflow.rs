//! WorkflowAgent (§4.4.1): step-sequence and SLA violations over workflow
//! events. Reads metadata keys `step_index` (u64), `step` (string),
//! `duration_seconds`/`sla_seconds` (f64), all optional per event.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::CycleError;
use crate::models::{new_id, Anomaly};

use super::{DetectionAgent, ObservationSnapshot};

pub struct WorkflowAgent;

const NAME: &str = "WorkflowAgent";

fn metadata_f64(event: &crate::models::Event, key: &str) -> Option<f64> {
    event.metadata.get(key).and_then(|v| v.as_f64())
}

fn metadata_u64(event: &crate::models::Event, key: &str) -> Option<u64> {
    event.metadata.get(key).and_then(|v| v.as_u64())
}

#[async_trait]
impl DetectionAgent for WorkflowAgent {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn detect(
        &self,
        cycle_id: &str,
        snapshot: &ObservationSnapshot,
        blackboard: &crate::blackboard::Blackboard,
    ) -> Result<(), CycleError> {
        let mut by_workflow: HashMap<&str, Vec<&crate::models::Event>> = HashMap::new();
        for event in &snapshot.events {
            if let Some(wf) = event.workflow_id.as_deref() {
                by_workflow.entry(wf).or_default().push(event);
            }
        }

        for events in by_workflow.values_mut() {
            events.sort_by_key(|e| e.timestamp);

            let mut last_index: Option<u64> = None;
            for event in events.iter() {
                if let (Some(duration), Some(sla)) = (
                    metadata_f64(event, "duration_seconds"),
                    metadata_f64(event, "sla_seconds"),
                ) {
                    if duration > sla && sla > 0.0 {
                        let overage_ratio = ((duration - sla) / sla).clamp(0.0, 1.0);
                        let confidence = (0.70 + 0.25 * overage_ratio).min(0.95);
                        emit(
                            blackboard,
                            cycle_id,
                            "WORKFLOW_DELAY",
                            event,
                            confidence,
                            format!("step duration {duration}s exceeded SLA {sla}s"),
                        )?;
                    }
                }

                if let Some(step_index) = metadata_u64(event, "step_index") {
                    match last_index {
                        Some(last) if step_index < last => {
                            emit(
                                blackboard,
                                cycle_id,
                                "SEQUENCE_VIOLATION",
                                event,
                                0.85,
                                format!("observed step index {step_index} < previous {last}"),
                            )?;
                        }
                        Some(last) if step_index > last + 1 => {
                            emit(
                                blackboard,
                                cycle_id,
                                "MISSING_STEP",
                                event,
                                0.95,
                                format!("step index jumped from {last} to {step_index}"),
                            )?;
                            last_index = Some(step_index);
                        }
                        _ => {
                            last_index = Some(step_index);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn emit(
    blackboard: &crate::blackboard::Blackboard,
    cycle_id: &str,
    anomaly_type: &str,
    event: &crate::models::Event,
    confidence: f64,
    description: String,
) -> Result<(), CycleError> {
    let anomaly = Anomaly {
        anomaly_id: new_id("anom"),
        anomaly_type: anomaly_type.to_string(),
        entity: event.workflow_id.clone().unwrap_or_default(),
        confidence,
        agent: NAME.to_string(),
        evidence_ids: vec![event.event_id.clone()],
        description,
        metadata: Default::default(),
        timestamp: event.timestamp,
    };
    blackboard
        .append_anomaly(cycle_id, NAME, anomaly)
        .map_err(|e| CycleError::AgentFailure {
            agent: NAME.to_string(),
            detail: e.to_string(),
        })
}
