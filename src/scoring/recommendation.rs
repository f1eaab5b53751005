//! Recommendation Engine (§4.6.3): maps findings onto a static
//! cause-to-action table. Actions are selected, never invented.

use crate::blackboard::Blackboard;
use crate::errors::CycleError;
use crate::models::{new_id, Recommendation, SeverityScore, Urgency};

const NAME: &str = "RecommendationEngine";

struct Action {
    text: &'static str,
    urgency: Urgency,
    base_rule: f64,
}

fn action_for(cause_key: &str) -> Option<Action> {
    match cause_key {
        "SUSTAINED_RESOURCE_CRITICAL" => Some(Action { text: "Throttle concurrent jobs on the affected resource", urgency: Urgency::High, base_rule: 0.90 }),
        "SUSTAINED_RESOURCE_WARNING" => Some(Action { text: "Schedule a capacity review for the affected resource", urgency: Urgency::Medium, base_rule: 0.75 }),
        "RESOURCE_DRIFT" => Some(Action { text: "Investigate the upward resource trend before it crosses threshold", urgency: Urgency::Medium, base_rule: 0.65 }),
        "WORKFLOW_DELAY" => Some(Action { text: "Escalate the delayed workflow step to its owning team", urgency: Urgency::Medium, base_rule: 0.75 }),
        "MISSING_STEP" => Some(Action { text: "Halt the workflow and reconcile the missing step before proceeding", urgency: Urgency::High, base_rule: 0.90 }),
        "SEQUENCE_VIOLATION" => Some(Action { text: "Audit the workflow instance for out-of-order execution", urgency: Urgency::High, base_rule: 0.80 }),
        "BASELINE_DEVIATION" => Some(Action { text: "Investigate the metric deviation against recent changes", urgency: Urgency::Medium, base_rule: 0.70 }),
        "HIGH_CHURN" => Some(Action { text: "Require an additional reviewer before merging this change", urgency: Urgency::Medium, base_rule: 0.70 }),
        "COVERAGE_REGRESSION" => Some(Action { text: "Block deployment until test coverage is restored", urgency: Urgency::High, base_rule: 0.85 }),
        "HOTSPOT_OVERLAP" => Some(Action { text: "Route this change through the hotspot file's designated owner", urgency: Urgency::High, base_rule: 0.80 }),
        "NO_AFTER_HOURS_WRITE" => Some(Action { text: "Require a documented change record for after-hours writes", urgency: Urgency::Medium, base_rule: 0.75 }),
        "NO_UNUSUAL_LOCATION" => Some(Action { text: "Verify the actor's identity out of band", urgency: Urgency::High, base_rule: 0.80 }),
        "NO_UNCONTROLLED_SENSITIVE_ACCESS" => Some(Action { text: "Attach a retroactive approval or revoke access", urgency: Urgency::High, base_rule: 0.85 }),
        "NO_SERVICE_ACCOUNT_DIRECT_WRITE" => Some(Action { text: "Route the write through a tracked change request", urgency: Urgency::High, base_rule: 0.85 }),
        "NO_SKIP_APPROVAL" => Some(Action { text: "Roll back the deploy pending the missing approval", urgency: Urgency::Critical, base_rule: 0.90 }),
        _ => None,
    }
}

fn recommend(
    cause_key: &str,
    evidence_ids: Vec<String>,
    severity_score: Option<&SeverityScore>,
) -> Option<Recommendation> {
    let action = action_for(cause_key)?;
    let context_match_score = if !evidence_ids.is_empty() { 1.0 } else { 0.7 };
    let severity_component = severity_score.map(|s| s.final_score / 10.0).unwrap_or(0.5);
    let confidence = 0.5 * action.base_rule + 0.2 * severity_component + 0.3 * context_match_score;

    Some(Recommendation {
        rec_id: new_id("rec"),
        cause_key: cause_key.to_string(),
        action: action.text.to_string(),
        urgency: action.urgency,
        rationale: format!("Triggered by {cause_key}"),
        confidence,
        evidence_ids,
    })
}

pub struct RecommendationEngine;

impl RecommendationEngine {
    pub fn run(&self, cycle_id: &str, blackboard: &Blackboard) -> Result<(), CycleError> {
        let severity_scores = blackboard.severity_scores_snapshot(cycle_id);
        let score_for = |target_id: &str| severity_scores.iter().find(|s| s.target_id == target_id);

        for anomaly in blackboard.anomalies_snapshot(cycle_id) {
            if let Some(rec) = recommend(
                &anomaly.anomaly_type,
                anomaly.evidence_ids.clone(),
                score_for(&anomaly.anomaly_id),
            ) {
                blackboard
                    .append_recommendation(cycle_id, NAME, rec)
                    .map_err(|e| CycleError::AgentFailure { agent: NAME.to_string(), detail: e.to_string() })?;
            }
        }
        for hit in blackboard.policy_hits_snapshot(cycle_id) {
            if let Some(rec) = recommend(&hit.policy_id, hit.evidence_ids.clone(), score_for(&hit.hit_id)) {
                blackboard
                    .append_recommendation(cycle_id, NAME, rec)
                    .map_err(|e| CycleError::AgentFailure { agent: NAME.to_string(), detail: e.to_string() })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_cause_maps_to_static_action_never_invented() {
        let rec = recommend("SUSTAINED_RESOURCE_CRITICAL", vec!["m1".into()], None).unwrap();
        assert_eq!(rec.action, "Throttle concurrent jobs on the affected resource");
        assert_eq!(rec.urgency, Urgency::High);
    }

    #[test]
    fn unknown_cause_produces_no_recommendation() {
        assert!(recommend("UNKNOWN_TYPE", vec!["m1".into()], None).is_none());
    }
}
