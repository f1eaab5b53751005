//! A single cycle's in-progress state: one `parking_lot::Mutex`-guarded
//! `Vec` per section, sealed by a compare-and-set on an `AtomicU8`.

use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::guards;
use crate::models::{
    Anomaly, CausalLink, Cycle, CycleFailure, CycleState, PolicyHit, Recommendation, RiskSignal,
    SeverityScore,
};

const OPEN: u8 = 0;
const SEALED: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SectionError {
    #[error("cycle {0} is already sealed")]
    CycleSealed(String),
    #[error("agent {agent} is not the owner of section {section} in cycle {cycle_id}")]
    SectionViolation {
        cycle_id: String,
        section: &'static str,
        agent: String,
    },
}

/// Section name → agents permitted to append to it. Fixed per cycle so two
/// agents can never collide on one section's ownership within a cycle.
fn owners(section: &'static str) -> &'static [&'static str] {
    match section {
        "anomalies" => &[
            "WorkflowAgent",
            "ResourceAgent",
            "ComplianceAgent",
            "AdaptiveBaselineAgent",
            "CodeAgent",
        ],
        "policy_hits" => &["ComplianceAgent"],
        "risk_signals" => &["RiskForecastAgent"],
        "causal_links" => &["CausalAgent"],
        "severity_scores" => &["SeverityEngineAgent"],
        "recommendations" => &["RecommendationEngine"],
        _ => &[],
    }
}

fn check_owner(cycle_id: &str, section: &'static str, agent: &str) -> Result<(), SectionError> {
    if owners(section).contains(&agent) {
        Ok(())
    } else {
        Err(SectionError::SectionViolation {
            cycle_id: cycle_id.to_string(),
            section,
            agent: agent.to_string(),
        })
    }
}

pub struct CycleHandle {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    state: AtomicU8,
    anomalies: Mutex<Vec<Anomaly>>,
    policy_hits: Mutex<Vec<PolicyHit>>,
    risk_signals: Mutex<Vec<RiskSignal>>,
    causal_links: Mutex<Vec<CausalLink>>,
    severity_scores: Mutex<Vec<SeverityScore>>,
    recommendations: Mutex<Vec<Recommendation>>,
    failures: Mutex<Vec<CycleFailure>>,
}

impl CycleHandle {
    pub fn new(cycle_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            started_at,
            state: AtomicU8::new(OPEN),
            anomalies: Mutex::new(Vec::new()),
            policy_hits: Mutex::new(Vec::new()),
            risk_signals: Mutex::new(Vec::new()),
            causal_links: Mutex::new(Vec::new()),
            severity_scores: Mutex::new(Vec::new()),
            recommendations: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    fn ensure_open(&self) -> Result<(), SectionError> {
        if self.state.load(Ordering::Acquire) == SEALED {
            return Err(SectionError::CycleSealed(self.cycle_id.clone()));
        }
        Ok(())
    }

    pub fn append_anomaly(&self, agent: &str, anomaly: Anomaly) -> Result<(), SectionError> {
        self.ensure_open()?;
        check_owner(&self.cycle_id, "anomalies", agent)?;
        guards::require_evidence("Anomaly", &anomaly.anomaly_id, &anomaly.evidence_ids);
        self.anomalies.lock().push(anomaly);
        Ok(())
    }

    pub fn append_policy_hit(&self, agent: &str, hit: PolicyHit) -> Result<(), SectionError> {
        self.ensure_open()?;
        check_owner(&self.cycle_id, "policy_hits", agent)?;
        guards::require_evidence("PolicyHit", &hit.hit_id, &hit.evidence_ids);
        self.policy_hits.lock().push(hit);
        Ok(())
    }

    pub fn append_risk_signal(&self, agent: &str, signal: RiskSignal) -> Result<(), SectionError> {
        self.ensure_open()?;
        check_owner(&self.cycle_id, "risk_signals", agent)?;
        guards::require_evidence("RiskSignal", &signal.entity, &signal.evidence_ids);
        self.risk_signals.lock().push(signal);
        Ok(())
    }

    pub fn append_causal_link(&self, agent: &str, link: CausalLink) -> Result<(), SectionError> {
        self.ensure_open()?;
        check_owner(&self.cycle_id, "causal_links", agent)?;
        guards::require_evidence("CausalLink", &link.link_id, &link.evidence_ids);
        self.causal_links.lock().push(link);
        Ok(())
    }

    pub fn append_severity_score(
        &self,
        agent: &str,
        score: SeverityScore,
    ) -> Result<(), SectionError> {
        self.ensure_open()?;
        check_owner(&self.cycle_id, "severity_scores", agent)?;
        self.severity_scores.lock().push(score);
        Ok(())
    }

    pub fn append_recommendation(
        &self,
        agent: &str,
        rec: Recommendation,
    ) -> Result<(), SectionError> {
        self.ensure_open()?;
        check_owner(&self.cycle_id, "recommendations", agent)?;
        guards::require_evidence("Recommendation", &rec.rec_id, &rec.evidence_ids);
        self.recommendations.lock().push(rec);
        Ok(())
    }

    /// Annotates a Phase-1/2/3 agent failure; never fails the cycle itself.
    pub fn append_failure(&self, failure: CycleFailure) {
        self.failures.lock().push(failure);
    }

    /// Snapshot reads for downstream sequential phases (forecast, causal,
    /// scoring) to consume what earlier phases have appended so far.
    pub fn anomalies_snapshot(&self) -> Vec<Anomaly> {
        self.anomalies.lock().clone()
    }

    pub fn policy_hits_snapshot(&self) -> Vec<PolicyHit> {
        self.policy_hits.lock().clone()
    }

    pub fn risk_signals_snapshot(&self) -> Vec<RiskSignal> {
        self.risk_signals.lock().clone()
    }

    pub fn severity_scores_snapshot(&self) -> Vec<SeverityScore> {
        self.severity_scores.lock().clone()
    }

    /// Seals the cycle, producing the immutable `Cycle` payload. Returns
    /// `None` if the handle was already sealed (caller treats as a no-op).
    pub fn seal(&self, completed_at: DateTime<Utc>) -> Option<Cycle> {
        if self
            .state
            .compare_exchange(OPEN, SEALED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let failures = self.failures.lock().clone();
        let degraded = !failures.is_empty();

        let mut cycle = Cycle {
            cycle_id: self.cycle_id.clone(),
            state: CycleState::Sealed,
            started_at: self.started_at,
            completed_at: Some(completed_at),
            anomalies: self.anomalies.lock().clone(),
            policy_hits: self.policy_hits.lock().clone(),
            risk_signals: self.risk_signals.lock().clone(),
            causal_links: self.causal_links.lock().clone(),
            severity_scores: self.severity_scores.lock().clone(),
            recommendations: self.recommendations.lock().clone(),
            failures,
            degraded,
            cycle_sha256: None,
        };
        cycle.cycle_sha256 = Some(super::hash::cycle_sha256(&cycle));
        Some(cycle)
    }

    pub fn is_sealed(&self) -> bool {
        self.state.load(Ordering::Acquire) == SEALED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anomaly() -> Anomaly {
        Anomaly {
            anomaly_id: "a1".into(),
            anomaly_type: "WORKFLOW_DELAY".into(),
            entity: "wf1".into(),
            confidence: 0.9,
            agent: "WorkflowAgent".into(),
            evidence_ids: vec!["e1".into()],
            description: "delayed".into(),
            metadata: Default::default(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn non_owning_agent_is_rejected() {
        let handle = CycleHandle::new("c1".into(), Utc::now());
        let err = handle.append_anomaly("RiskForecastAgent", anomaly()).unwrap_err();
        assert!(matches!(err, SectionError::SectionViolation { .. }));
    }

    #[test]
    fn append_after_seal_fails() {
        let handle = CycleHandle::new("c1".into(), Utc::now());
        handle.append_anomaly("WorkflowAgent", anomaly()).unwrap();
        handle.seal(Utc::now()).unwrap();

        let err = handle.append_anomaly("WorkflowAgent", anomaly()).unwrap_err();
        assert!(matches!(err, SectionError::CycleSealed(_)));
    }

    #[test]
    fn double_seal_returns_none_on_second_call() {
        let handle = CycleHandle::new("c1".into(), Utc::now());
        assert!(handle.seal(Utc::now()).is_some());
        assert!(handle.seal(Utc::now()).is_none());
    }
}
