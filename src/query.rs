//! Query Engine (C8): keyword-rule intent classification over natural
//! language, evidence retrieval from the last 5 sealed cycles, and a
//! templated structured answer. No ML, per the scope this module covers.

use std::sync::Arc;

use crate::blackboard::Blackboard;
use crate::models::Cycle;
use crate::scoring::RiskIndexTracker;

const RECENT_CYCLE_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    RiskStatus,
    Causal,
    Compliance,
    Workflow,
    Resource,
    Prediction,
    General,
}

/// Keyword sets checked in this exact order; the first intent with a
/// non-empty match wins (declaration order is the tie-break).
const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (Intent::RiskStatus, &["risk level", "risk status", "how risky", "overall risk"]),
    (Intent::Causal, &["why", "cause", "caused by", "root cause", "because of"]),
    (Intent::Compliance, &["policy", "compliance", "violation", "unauthorized"]),
    (Intent::Workflow, &["workflow", "deploy", "step", "sla", "delay"]),
    (Intent::Resource, &["cpu", "memory", "latency", "resource", "capacity"]),
    (Intent::Prediction, &["predict", "forecast", "will", "projected", "next"]),
];

fn classify(query: &str) -> Intent {
    let lowered = query.to_lowercase();
    for (intent, keywords) in INTENT_KEYWORDS {
        if keywords.iter().any(|k| lowered.contains(k)) {
            return *intent;
        }
    }
    Intent::General
}

struct EvidenceItem {
    summary: String,
    confidence: f64,
}

fn gather_evidence(intent: Intent, cycles: &[Cycle]) -> Vec<EvidenceItem> {
    let mut items = Vec::new();
    for cycle in cycles {
        match intent {
            Intent::RiskStatus | Intent::Prediction => {
                for signal in &cycle.risk_signals {
                    items.push(EvidenceItem {
                        summary: format!(
                            "{}: {:?} -> {:?} over {}",
                            signal.entity, signal.current_state, signal.projected_state, signal.time_horizon
                        ),
                        confidence: signal.confidence,
                    });
                }
                if intent == Intent::Prediction {
                    for link in &cycle.causal_links {
                        items.push(EvidenceItem {
                            summary: format!("{} may lead to {}", link.cause_type, link.effect_type),
                            confidence: link.confidence,
                        });
                    }
                }
            }
            Intent::Causal => {
                for link in &cycle.causal_links {
                    items.push(EvidenceItem {
                        summary: format!(
                            "{} preceded {} by {:.0}s: {}",
                            link.cause_type, link.effect_type, link.temporal_distance_seconds, link.reasoning
                        ),
                        confidence: link.confidence,
                    });
                }
            }
            Intent::Compliance => {
                for hit in &cycle.policy_hits {
                    items.push(EvidenceItem {
                        summary: format!("{:?} hit on policy {} ({:?})", hit.violation_type, hit.policy_id, hit.severity),
                        confidence: 0.9,
                    });
                }
            }
            Intent::Workflow => {
                for anomaly in &cycle.anomalies {
                    if matches!(anomaly.anomaly_type.as_str(), "WORKFLOW_DELAY" | "SEQUENCE_VIOLATION" | "MISSING_STEP") {
                        items.push(EvidenceItem {
                            summary: format!("{} on {}: {}", anomaly.anomaly_type, anomaly.entity, anomaly.description),
                            confidence: anomaly.confidence,
                        });
                    }
                }
            }
            Intent::Resource => {
                for anomaly in &cycle.anomalies {
                    if matches!(
                        anomaly.anomaly_type.as_str(),
                        "SUSTAINED_RESOURCE_CRITICAL" | "SUSTAINED_RESOURCE_WARNING" | "RESOURCE_DRIFT" | "BASELINE_DEVIATION"
                    ) {
                        items.push(EvidenceItem {
                            summary: format!("{} on {}: {}", anomaly.anomaly_type, anomaly.entity, anomaly.description),
                            confidence: anomaly.confidence,
                        });
                    }
                }
            }
            Intent::General => {
                for anomaly in &cycle.anomalies {
                    items.push(EvidenceItem {
                        summary: format!("{} on {}", anomaly.anomaly_type, anomaly.entity),
                        confidence: anomaly.confidence,
                    });
                }
                for hit in &cycle.policy_hits {
                    items.push(EvidenceItem {
                        summary: format!("policy hit {}", hit.policy_id),
                        confidence: 0.9,
                    });
                }
            }
        }
    }
    items
}

fn confidence_for(items: &[EvidenceItem]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = items.iter().map(|i| i.confidence.clamp(0.0, 1.0)).collect();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    let top10 = &sorted[..sorted.len().min(10)];
    let mean = top10.iter().sum::<f64>() / top10.len() as f64;
    let bonus = (0.01 * (items.len() as i64 - 3).max(0) as f64).min(0.08);
    (mean + bonus).min(1.0)
}

fn compose_answer(intent: Intent, items: &[EvidenceItem]) -> String {
    let lines: Vec<String> = items.iter().take(10).map(|i| format!("- {}", i.summary)).collect();
    let preamble = match intent {
        Intent::RiskStatus => "Current risk signals across recently sealed cycles:",
        Intent::Causal => "Causal links found in recently sealed cycles:",
        Intent::Compliance => "Policy violations found in recently sealed cycles:",
        Intent::Workflow => "Workflow anomalies found in recently sealed cycles:",
        Intent::Resource => "Resource anomalies found in recently sealed cycles:",
        Intent::Prediction => "Risk projections and likely downstream effects:",
        Intent::General => "Findings across recently sealed cycles:",
    };
    format!("{preamble}\n{}", lines.join("\n"))
}

pub struct QueryAnswer {
    pub intent: Intent,
    pub answer: String,
    pub confidence: f64,
    pub evidence_count: usize,
    pub uncertainty: Option<String>,
}

pub struct QueryEngine {
    blackboard: Arc<Blackboard>,
    risk_tracker: Arc<RiskIndexTracker>,
}

impl QueryEngine {
    pub fn new(blackboard: Arc<Blackboard>, risk_tracker: Arc<RiskIndexTracker>) -> Self {
        Self { blackboard, risk_tracker }
    }

    pub fn answer(&self, query: &str) -> QueryAnswer {
        let intent = classify(query);
        let cycles = self.blackboard.recent_cycles(RECENT_CYCLE_WINDOW);
        let mut items = gather_evidence(intent, &cycles);

        if intent == Intent::RiskStatus {
            if let Some(snapshot) = self.risk_tracker.current() {
                items.push(EvidenceItem {
                    summary: format!("composite risk score {:.1} ({:?})", snapshot.risk_score, snapshot.band),
                    confidence: 1.0,
                });
            }
        }

        if items.is_empty() {
            return QueryAnswer {
                intent,
                answer: String::new(),
                confidence: 0.0,
                evidence_count: 0,
                uncertainty: Some("no evidence".to_string()),
            };
        }

        let confidence = confidence_for(&items);
        let evidence_count = items.len();
        let answer = compose_answer(intent, &items);

        QueryAnswer { intent, answer, confidence, evidence_count, uncertainty: None }
    }
}
