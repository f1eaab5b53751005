//! CausalAgent (§4.5.2, Phase 3): links detection-level causes to their
//! downstream effects within a 60-second temporal window.

use chrono::{DateTime, Utc};

use crate::blackboard::Blackboard;
use crate::errors::CycleError;
use crate::models::{new_id, CausalLink, RiskState, ViolationType};

const NAME: &str = "CausalAgent";
const WINDOW_SECONDS: f64 = 60.0;

struct Candidate {
    kind: String,
    timestamp: DateTime<Utc>,
    evidence_id: String,
}

struct EffectCandidate {
    kind: &'static str,
    timestamp: DateTime<Utc>,
    evidence_id: String,
}

const PAIRS: &[(&str, &str, f64)] = &[
    ("SUSTAINED_RESOURCE_CRITICAL", "WORKFLOW_DELAY", 0.85),
    ("SUSTAINED_RESOURCE_WARNING", "WORKFLOW_DELAY", 0.70),
    ("RESOURCE_DRIFT", "WORKFLOW_DELAY", 0.60),
    ("MISSING_STEP", "SILENT", 0.90),
    ("SEQUENCE_VIOLATION", "AT_RISK", 0.75),
];

pub struct CausalAgent;

impl CausalAgent {
    pub fn run(&self, cycle_id: &str, blackboard: &Blackboard) -> Result<(), CycleError> {
        let anomalies = blackboard.anomalies_snapshot(cycle_id);
        let policy_hits = blackboard.policy_hits_snapshot(cycle_id);
        let risk_signals = blackboard.risk_signals_snapshot(cycle_id);

        let mut causes: Vec<Candidate> = anomalies
            .iter()
            .map(|a| Candidate {
                kind: a.anomaly_type.clone(),
                timestamp: a.timestamp,
                evidence_id: a.anomaly_id.clone(),
            })
            .collect();
        causes.sort_by_key(|c| c.timestamp);

        let mut effects: Vec<EffectCandidate> = anomalies
            .iter()
            .filter(|a| a.anomaly_type == "WORKFLOW_DELAY")
            .map(|a| EffectCandidate {
                kind: "WORKFLOW_DELAY",
                timestamp: a.timestamp,
                evidence_id: a.anomaly_id.clone(),
            })
            .collect();
        effects.extend(policy_hits.iter().filter(|h| h.violation_type == ViolationType::Silent).map(|h| {
            EffectCandidate { kind: "SILENT", timestamp: h.timestamp, evidence_id: h.hit_id.clone() }
        }));
        effects.extend(
            risk_signals
                .iter()
                .filter(|r| r.projected_state == RiskState::AtRisk)
                .map(|r| EffectCandidate {
                    kind: "AT_RISK",
                    timestamp: r.timestamp,
                    evidence_id: r.entity.clone(),
                }),
        );

        for effect in &effects {
            let mut best: Option<(&Candidate, f64, f64)> = None;

            for &(cause_type, effect_type, base) in PAIRS {
                if effect_type != effect.kind {
                    continue;
                }
                for cause in &causes {
                    if cause.kind != cause_type {
                        continue;
                    }
                    if cause.timestamp >= effect.timestamp {
                        continue;
                    }
                    let distance = (effect.timestamp - cause.timestamp).num_milliseconds() as f64 / 1000.0;
                    if distance > WINDOW_SECONDS {
                        continue;
                    }
                    let better = match &best {
                        None => true,
                        Some((_, _, best_distance)) => distance < *best_distance,
                    };
                    if better {
                        best = Some((cause, base, distance));
                    }
                }
            }

            if let Some((cause, base, distance)) = best {
                let confidence = base * (1.0 - (distance / WINDOW_SECONDS) * 0.3);
                let link = CausalLink {
                    link_id: new_id("link"),
                    cause_type: cause.kind.to_string(),
                    effect_type: effect.kind.to_string(),
                    confidence,
                    temporal_distance_seconds: distance,
                    reasoning: format!(
                        "{} preceded {} by {:.1}s, within the causal window",
                        cause.kind, effect.kind, distance
                    ),
                    evidence_ids: vec![cause.evidence_id.clone(), effect.evidence_id.clone()],
                };
                blackboard
                    .append_causal_link(cycle_id, NAME, link)
                    .map_err(|e| CycleError::AgentFailure {
                        agent: NAME.to_string(),
                        detail: e.to_string(),
                    })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{new_id as mk_id, Anomaly};
    use chrono::Duration;

    fn anomaly_at(anomaly_type: &str, entity: &str, secs_ago: i64) -> Anomaly {
        Anomaly {
            anomaly_id: mk_id("anom"),
            anomaly_type: anomaly_type.into(),
            entity: entity.into(),
            confidence: 0.9,
            agent: "agent".into(),
            evidence_ids: vec!["e1".into()],
            description: "".into(),
            metadata: Default::default(),
            timestamp: Utc::now() - Duration::seconds(secs_ago),
        }
    }

    #[test]
    fn resource_cascade_links_to_workflow_delay_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let handle = blackboard.start_cycle();

        blackboard
            .append_anomaly(
                &handle.cycle_id,
                "ResourceAgent",
                anomaly_at("SUSTAINED_RESOURCE_CRITICAL", "vm_2", 20),
            )
            .unwrap();
        blackboard
            .append_anomaly(&handle.cycle_id, "WorkflowAgent", anomaly_at("WORKFLOW_DELAY", "wf1", 0))
            .unwrap();

        CausalAgent.run(&handle.cycle_id, &blackboard).unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert_eq!(sealed.causal_links.len(), 1);
        let link = &sealed.causal_links[0];
        assert_eq!(link.cause_type, "SUSTAINED_RESOURCE_CRITICAL");
        assert_eq!(link.effect_type, "WORKFLOW_DELAY");
        assert!(link.confidence < 0.85 && link.confidence > 0.7);
    }

    #[test]
    fn cause_outside_window_does_not_link() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let handle = blackboard.start_cycle();

        blackboard
            .append_anomaly(
                &handle.cycle_id,
                "ResourceAgent",
                anomaly_at("SUSTAINED_RESOURCE_CRITICAL", "vm_2", 120),
            )
            .unwrap();
        blackboard
            .append_anomaly(&handle.cycle_id, "WorkflowAgent", anomaly_at("WORKFLOW_DELAY", "wf1", 0))
            .unwrap();

        CausalAgent.run(&handle.cycle_id, &blackboard).unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert!(sealed.causal_links.is_empty());
    }

    #[test]
    fn repeated_cause_type_picks_the_closest_in_window() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let handle = blackboard.start_cycle();

        for secs_ago in [50, 30, 10] {
            blackboard
                .append_anomaly(
                    &handle.cycle_id,
                    "ResourceAgent",
                    anomaly_at("SUSTAINED_RESOURCE_CRITICAL", "vm_2", secs_ago),
                )
                .unwrap();
        }
        blackboard
            .append_anomaly(&handle.cycle_id, "WorkflowAgent", anomaly_at("WORKFLOW_DELAY", "wf1", 0))
            .unwrap();

        CausalAgent.run(&handle.cycle_id, &blackboard).unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert_eq!(sealed.causal_links.len(), 1);
        assert_eq!(sealed.causal_links[0].temporal_distance_seconds, 10.0);
    }
}
