//! RiskForecastAgent (§4.5.1, Phase 2): projects a per-entity risk state
//! from the anomalies and policy hits this cycle's Phase-1 agents have
//! already appended. Runs sequentially, after the Phase-1 barrier.

use std::collections::HashMap;

use chrono::Utc;

use crate::blackboard::Blackboard;
use crate::errors::CycleError;
use crate::models::{RiskSignal, RiskState};

const NAME: &str = "RiskForecastAgent";

pub struct RiskForecastAgent;

impl RiskForecastAgent {
    pub fn run(&self, cycle_id: &str, blackboard: &Blackboard) -> Result<(), CycleError> {
        let anomalies = blackboard.anomalies_snapshot(cycle_id);
        let policy_hits = blackboard.policy_hits_snapshot(cycle_id);
        let policy_violation_count = policy_hits.len() as u32;
        let policy_evidence: Vec<String> = policy_hits.iter().map(|h| h.hit_id.clone()).collect();

        let mut by_entity: HashMap<String, Vec<String>> = HashMap::new();
        for anomaly in &anomalies {
            by_entity.entry(anomaly.entity.clone()).or_default().push(anomaly.anomaly_id.clone());
        }
        if by_entity.is_empty() && !policy_hits.is_empty() {
            by_entity.insert("global".to_string(), Vec::new());
        }

        for (entity, anomaly_ids) in by_entity {
            let anomaly_count = anomaly_ids.len() as u32;
            let total_issues = anomaly_count + 2 * policy_violation_count;

            let current_state = RiskState::from_total_issues(anomaly_count);
            let projected_state = RiskState::from_total_issues(total_issues);

            let time_horizon = match total_issues {
                0..=2 => "15-30 min",
                3..=4 => "10-15 min",
                _ => "5-10 min",
            };

            let confidence = (0.50
                + (0.1 * anomaly_count as f64).min(0.30)
                + (0.1 * policy_violation_count as f64).min(0.20))
            .min(0.95);

            let mut evidence_ids = anomaly_ids;
            evidence_ids.extend(policy_evidence.clone());
            if evidence_ids.is_empty() {
                continue;
            }

            let signal = RiskSignal {
                entity,
                current_state,
                projected_state,
                confidence,
                time_horizon: time_horizon.to_string(),
                evidence_ids,
                timestamp: Utc::now(),
            };
            blackboard
                .append_risk_signal(cycle_id, NAME, signal)
                .map_err(|e| CycleError::AgentFailure {
                    agent: NAME.to_string(),
                    detail: e.to_string(),
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{new_id as mk_id, Anomaly, PolicyHit, Severity, ViolationType};

    fn anomaly(entity: &str, anomaly_type: &str) -> Anomaly {
        Anomaly {
            anomaly_id: mk_id("anom"),
            anomaly_type: anomaly_type.into(),
            entity: entity.into(),
            confidence: 0.9,
            agent: "ResourceAgent".into(),
            evidence_ids: vec!["m1".into()],
            description: "".into(),
            metadata: Default::default(),
            timestamp: Utc::now(),
        }
    }

    fn policy_hit() -> PolicyHit {
        PolicyHit {
            hit_id: mk_id("hit"),
            policy_id: "NO_AFTER_HOURS_WRITE".into(),
            event_id: "e1".into(),
            violation_type: ViolationType::Silent,
            severity: Severity::Medium,
            evidence_ids: vec!["e1".into()],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn total_issues_drives_projected_state_per_spec_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let handle = blackboard.start_cycle();

        blackboard
            .append_anomaly(&handle.cycle_id, "ResourceAgent", anomaly("vm_2", "SUSTAINED_RESOURCE_CRITICAL"))
            .unwrap();
        blackboard
            .append_policy_hit(&handle.cycle_id, "ComplianceAgent", policy_hit())
            .unwrap();
        blackboard
            .append_policy_hit(&handle.cycle_id, "ComplianceAgent", {
                let mut h = policy_hit();
                h.hit_id = mk_id("hit");
                h.policy_id = "NO_SKIP_APPROVAL".into();
                h
            })
            .unwrap();

        RiskForecastAgent.run(&handle.cycle_id, &blackboard).unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert_eq!(sealed.risk_signals.len(), 1);
        let signal = &sealed.risk_signals[0];
        // total_issues = 1 anomaly + 2*2 policy hits = 5 -> VIOLATION
        assert_eq!(signal.projected_state, RiskState::Violation);
    }
}
