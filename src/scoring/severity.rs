//! SeverityEngineAgent (§4.6.1): maps each anomaly/policy hit onto a 0-10
//! severity score via a type-specific base formula plus bounded context
//! multipliers.

use crate::blackboard::Blackboard;
use crate::errors::CycleError;
use crate::models::{Anomaly, PolicyHit, SeverityLabel, SeverityScore};

const NAME: &str = "SeverityEngineAgent";

/// `base_score(type, confidence)` per the worked examples in §4.6.1,
/// extended to every anomaly/policy type this engine can see.
fn base_score_for_anomaly(anomaly_type: &str, confidence: f64) -> f64 {
    match anomaly_type {
        "WORKFLOW_DELAY" => 4.0 + 4.0 * confidence,
        "MISSING_STEP" => 7.0 + 2.0 * confidence,
        "SEQUENCE_VIOLATION" => 5.0 + 3.0 * confidence,
        "SUSTAINED_RESOURCE_CRITICAL" => 5.0 + 5.0 * confidence,
        "SUSTAINED_RESOURCE_WARNING" => 3.0 + 3.0 * confidence,
        "RESOURCE_DRIFT" => 2.0 + 3.0 * confidence,
        "BASELINE_DEVIATION" => 3.0 + 4.0 * confidence,
        "HIGH_CHURN" => 3.0 + 3.0 * confidence,
        "COVERAGE_REGRESSION" => 3.0 + 3.0 * confidence,
        "HOTSPOT_OVERLAP" => 4.0 + 3.0 * confidence,
        _ => 3.0 + 3.0 * confidence,
    }
}

fn base_score_for_policy(severity: crate::models::Severity, confidence: f64) -> f64 {
    use crate::models::Severity::*;
    let floor = match severity {
        Low => 2.0,
        Medium => 4.0,
        High => 6.0,
        Critical => 8.0,
    };
    floor + 2.0 * confidence
}

/// Context multipliers, each a factor near 1.0. Absent a real asset/data/
/// role catalog, each factor defaults to 1.0 (no adjustment) unless the
/// finding's metadata documents one of the recognized keys.
struct ContextFactors {
    asset: f64,
    data: f64,
    time: f64,
    role: f64,
    repetition: f64,
    blast: f64,
    module: f64,
}

impl Default for ContextFactors {
    fn default() -> Self {
        Self { asset: 1.0, data: 1.0, time: 1.0, role: 1.0, repetition: 1.0, blast: 1.0, module: 1.0 }
    }
}

const WEIGHTS: [f64; 7] = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];

fn weighted_delta(factors: &ContextFactors) -> f64 {
    let values = [
        factors.asset,
        factors.data,
        factors.time,
        factors.role,
        factors.repetition,
        factors.blast,
        factors.module,
    ];
    let raw: f64 = WEIGHTS.iter().zip(values.iter()).map(|(w, f)| w * (f - 1.0)).sum();
    raw.clamp(-0.4, 0.6)
}

fn label_for(score: f64) -> SeverityLabel {
    if score <= 0.0 {
        SeverityLabel::None
    } else if score < 4.0 {
        SeverityLabel::Low
    } else if score < 7.0 {
        SeverityLabel::Medium
    } else if score < 9.0 {
        SeverityLabel::High
    } else {
        SeverityLabel::Critical
    }
}

fn score_from_base(target_id: String, base_score: f64) -> SeverityScore {
    let factors = ContextFactors::default();
    let delta = weighted_delta(&factors);
    let final_score = (base_score * (1.0 + delta)).clamp(0.0, 10.0);
    SeverityScore { target_id, base_score, weighted_delta: delta, final_score, label: label_for(final_score) }
}

pub fn score_anomaly(anomaly: &Anomaly) -> SeverityScore {
    score_from_base(anomaly.anomaly_id.clone(), base_score_for_anomaly(&anomaly.anomaly_type, anomaly.confidence))
}

pub fn score_policy_hit(hit: &PolicyHit) -> SeverityScore {
    let confidence = 0.9; // PolicyHit carries no standalone confidence; treated as high-certainty by construction.
    score_from_base(hit.hit_id.clone(), base_score_for_policy(hit.severity, confidence))
}

pub struct SeverityEngineAgent;

impl SeverityEngineAgent {
    pub fn run(&self, cycle_id: &str, blackboard: &Blackboard) -> Result<(), CycleError> {
        for anomaly in blackboard.anomalies_snapshot(cycle_id) {
            let score = score_anomaly(&anomaly);
            blackboard
                .append_severity_score(cycle_id, NAME, score)
                .map_err(|e| CycleError::AgentFailure { agent: NAME.to_string(), detail: e.to_string() })?;
        }
        for hit in blackboard.policy_hits_snapshot(cycle_id) {
            let score = score_policy_hit(&hit);
            blackboard
                .append_severity_score(cycle_id, NAME, score)
                .map_err(|e| CycleError::AgentFailure { agent: NAME.to_string(), detail: e.to_string() })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::new_id;

    #[test]
    fn workflow_delay_base_score_matches_worked_example() {
        let anomaly = Anomaly {
            anomaly_id: new_id("anom"),
            anomaly_type: "WORKFLOW_DELAY".into(),
            entity: "wf1".into(),
            confidence: 0.95,
            agent: "WorkflowAgent".into(),
            evidence_ids: vec!["e1".into()],
            description: "".into(),
            metadata: Default::default(),
            timestamp: chrono::Utc::now(),
        };
        let score = score_anomaly(&anomaly);
        assert!((score.base_score - (4.0 + 4.0 * 0.95)).abs() < 1e-9);
        assert!(score.final_score >= 0.0 && score.final_score <= 10.0);
        assert!(score.weighted_delta >= -0.4 && score.weighted_delta <= 0.6);
    }

    #[test]
    fn label_boundaries_match_spec() {
        assert_eq!(label_for(0.0), SeverityLabel::None);
        assert_eq!(label_for(3.99), SeverityLabel::Low);
        assert_eq!(label_for(4.0), SeverityLabel::Medium);
        assert_eq!(label_for(6.99), SeverityLabel::Medium);
        assert_eq!(label_for(7.0), SeverityLabel::High);
        assert_eq!(label_for(8.99), SeverityLabel::High);
        assert_eq!(label_for(9.0), SeverityLabel::Critical);
    }
}
