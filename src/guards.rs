//! Runtime-enforced invariants (§4.10). A triggered guard is fatal: it logs
//! full context at `error` level and panics, aborting the current cycle or
//! request task rather than letting the audit trail observe inconsistent
//! state. Guards are checked inline at the point of violation, not as a
//! separate sweep.

use tracing::error;

/// Anomaly/PolicyHit/Recommendation/CausalLink lacking evidence.
pub fn require_evidence(kind: &str, id: &str, evidence_ids: &[String]) {
    if evidence_ids.is_empty() {
        error!(kind, id, "EvidenceRequired: append carries no evidence_ids");
        panic!("EvidenceRequired: {kind} {id} has empty evidence_ids");
    }
}

/// An agent attempting to append directly to the Observation Store.
pub fn forbid_agent_event_emission(agent: &str) {
    error!(agent, "AgentCannotEmitEvents: agent attempted to write C1");
    panic!("AgentCannotEmitEvents: {agent} attempted to emit an Event or Metric");
}

/// An incoming event carrying a severity field — severity is a cycle
/// output, never a raw-fact field.
pub fn forbid_severity_at_ingestion(event_id: &str) {
    error!(event_id, "EventMustBeRawFact: severity field present at ingestion");
    panic!("EventMustBeRawFact: event {event_id} carries a severity field at ingestion");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "EvidenceRequired")]
    fn require_evidence_panics_on_empty() {
        require_evidence("Anomaly", "a1", &[]);
    }

    #[test]
    fn require_evidence_passes_with_evidence() {
        require_evidence("Anomaly", "a1", &["e1".to_string()]);
    }

    #[test]
    #[should_panic(expected = "AgentCannotEmitEvents")]
    fn forbid_agent_event_emission_panics() {
        forbid_agent_event_emission("WorkflowAgent");
    }

    #[test]
    #[should_panic(expected = "EventMustBeRawFact")]
    fn forbid_severity_at_ingestion_panics() {
        forbid_severity_at_ingestion("evt_1");
    }
}
