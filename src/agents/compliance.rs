//! ComplianceAgent (§4.4.3): evaluates every event against a fixed set of
//! policy predicates and emits PolicyHit, deduplicated by
//! `(policy_id, event_id)`.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Timelike;

use crate::errors::CycleError;
use crate::models::{new_id, Event, Policy, PolicyHit, Severity, ViolationType};

use super::{DetectionAgent, ObservationSnapshot};

pub struct ComplianceAgent {
    policies: Vec<Policy>,
}

const NAME: &str = "ComplianceAgent";

impl ComplianceAgent {
    pub fn new() -> Self {
        Self { policies: default_policies() }
    }

    pub fn with_policies(policies: Vec<Policy>) -> Self {
        Self { policies }
    }
}

impl Default for ComplianceAgent {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_policies() -> Vec<Policy> {
    vec![
        Policy {
            policy_id: "NO_AFTER_HOURS_WRITE".into(),
            predicate: "ACCESS_WRITE outside 07:00-19:00".into(),
            severity: Severity::Medium,
            rationale: "Writes outside business hours bypass peer observation".into(),
        },
        Policy {
            policy_id: "NO_UNUSUAL_LOCATION".into(),
            predicate: "actor location not in known set".into(),
            severity: Severity::Medium,
            rationale: "Access from an unrecognized location is a compromise indicator".into(),
        },
        Policy {
            policy_id: "NO_UNCONTROLLED_SENSITIVE_ACCESS".into(),
            predicate: "sensitive resource access without an approval reference".into(),
            severity: Severity::High,
            rationale: "Sensitive resources require a traceable approval".into(),
        },
        Policy {
            policy_id: "NO_SERVICE_ACCOUNT_DIRECT_WRITE".into(),
            predicate: "service account write without change_request_id".into(),
            severity: Severity::High,
            rationale: "Automation writes must be traceable to a change request".into(),
        },
        Policy {
            policy_id: "NO_SKIP_APPROVAL".into(),
            predicate: "DEPLOY step without a preceding APPROVAL step".into(),
            severity: Severity::High,
            rationale: "Deploys must be gated by an explicit approval step".into(),
        },
    ]
}

fn matches_after_hours_write(event: &Event) -> bool {
    event.event_type == "ACCESS_WRITE" && !(7..19).contains(&event.timestamp.hour())
}

fn matches_unusual_location(event: &Event) -> bool {
    const KNOWN: &[&str] = &["hq", "vpn", "us-east", "eu-west"];
    match event.metadata.get("location").and_then(|v| v.as_str()) {
        Some(loc) => !KNOWN.contains(&loc),
        None => false,
    }
}

const SENSITIVE_RESOURCES: &[&str] = &["config", "secrets", "billing", "iam"];

fn matches_uncontrolled_sensitive_access(event: &Event) -> bool {
    let touches_sensitive = event
        .resource
        .as_deref()
        .map(|r| SENSITIVE_RESOURCES.contains(&r))
        .unwrap_or(false);
    let approved = event.metadata.get("approval_id").is_some();
    touches_sensitive && !approved
}

fn matches_service_account_direct_write(event: &Event) -> bool {
    event.event_type == "ACCESS_WRITE"
        && event.actor.starts_with("svc_")
        && event.metadata.get("change_request_id").is_none()
}

fn matches_skipped_approval(event: &Event, snapshot: &ObservationSnapshot) -> bool {
    if event.metadata.get("step").and_then(|v| v.as_str()) != Some("DEPLOY") {
        return false;
    }
    let Some(workflow_id) = event.workflow_id.as_deref() else {
        return false;
    };
    !snapshot.events.iter().any(|e| {
        e.workflow_id.as_deref() == Some(workflow_id)
            && e.metadata.get("step").and_then(|v| v.as_str()) == Some("APPROVAL")
            && e.timestamp <= event.timestamp
    })
}

fn outcome_is_silent(event: &Event) -> bool {
    event.metadata.get("outcome").and_then(|v| v.as_str()) != Some("denied")
}

#[async_trait]
impl DetectionAgent for ComplianceAgent {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn detect(
        &self,
        cycle_id: &str,
        snapshot: &ObservationSnapshot,
        blackboard: &crate::blackboard::Blackboard,
    ) -> Result<(), CycleError> {
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for event in &snapshot.events {
            for policy in &self.policies {
                let matched = match policy.policy_id.as_str() {
                    "NO_AFTER_HOURS_WRITE" => matches_after_hours_write(event),
                    "NO_UNUSUAL_LOCATION" => matches_unusual_location(event),
                    "NO_UNCONTROLLED_SENSITIVE_ACCESS" => matches_uncontrolled_sensitive_access(event),
                    "NO_SERVICE_ACCOUNT_DIRECT_WRITE" => matches_service_account_direct_write(event),
                    "NO_SKIP_APPROVAL" => matches_skipped_approval(event, snapshot),
                    _ => false,
                };
                if !matched {
                    continue;
                }

                let key = (policy.policy_id.clone(), event.event_id.clone());
                if !seen.insert(key) {
                    continue;
                }

                let violation_type = if outcome_is_silent(event) {
                    ViolationType::Silent
                } else {
                    ViolationType::Explicit
                };

                let hit = PolicyHit {
                    hit_id: new_id("hit"),
                    policy_id: policy.policy_id.clone(),
                    event_id: event.event_id.clone(),
                    violation_type,
                    severity: policy.severity,
                    evidence_ids: vec![event.event_id.clone()],
                    timestamp: event.timestamp,
                };
                blackboard
                    .append_policy_hit(cycle_id, NAME, hit)
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
    use crate::blackboard::Blackboard;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn after_hours_write(id: &str) -> Event {
        Event {
            event_id: id.into(),
            event_type: "ACCESS_WRITE".into(),
            workflow_id: None,
            actor: "svc_bot".into(),
            resource: Some("config".into()),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 2, 17, 0).unwrap(),
            metadata: HashMap::new(),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn silent_after_hours_write_on_sensitive_resource_yields_two_hits() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let handle = blackboard.start_cycle();

        let snapshot = ObservationSnapshot {
            taken_at: Utc::now(),
            events: vec![after_hours_write("e1")],
            metrics: vec![],
        };

        ComplianceAgent::new()
            .detect(&handle.cycle_id, &snapshot, &blackboard)
            .await
            .unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert_eq!(sealed.policy_hits.len(), 2);
        assert!(sealed
            .policy_hits
            .iter()
            .all(|h| h.violation_type == ViolationType::Silent));
        let policy_ids: HashSet<_> = sealed.policy_hits.iter().map(|h| h.policy_id.clone()).collect();
        assert!(policy_ids.contains("NO_AFTER_HOURS_WRITE"));
        assert!(policy_ids.contains("NO_UNCONTROLLED_SENSITIVE_ACCESS"));
    }

    #[tokio::test]
    async fn dedup_keeps_one_hit_per_policy_event_pair() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let handle = blackboard.start_cycle();

        let snapshot = ObservationSnapshot {
            taken_at: Utc::now(),
            events: vec![after_hours_write("e1"), after_hours_write("e1")],
            metrics: vec![],
        };

        ComplianceAgent::new()
            .detect(&handle.cycle_id, &snapshot, &blackboard)
            .await
            .unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert_eq!(sealed.policy_hits.len(), 2);
    }
}
