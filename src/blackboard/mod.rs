//! Blackboard (C3): the per-cycle, append-only artifact store shared by
//! every agent in a reasoning cycle. Section ownership and the OPEN→SEALED
//! state machine replace ad hoc locking with structural guarantees.

mod cycle;
mod hash;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::errors::StorageError;
use crate::models::{
    new_id, Anomaly, CausalLink, Cycle, CycleFailure, PolicyHit, Recommendation, RiskSignal,
    SeverityScore,
};
use crate::store::AppendLog;

pub use cycle::{CycleHandle, SectionError};

pub struct Blackboard {
    open_cycles: RwLock<HashMap<String, Arc<CycleHandle>>>,
    sealed: RwLock<Vec<Cycle>>,
    sealed_log: RwLock<AppendLog>,
}

impl Blackboard {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let log = AppendLog::open(data_dir.as_ref().join("cycles.ndjson"))?;
        let sealed: Vec<Cycle> = log.replay()?;
        Ok(Self {
            open_cycles: RwLock::new(HashMap::new()),
            sealed: RwLock::new(sealed),
            sealed_log: RwLock::new(log),
        })
    }

    pub fn start_cycle(&self) -> Arc<CycleHandle> {
        let cycle_id = new_id("cycle");
        let handle = Arc::new(CycleHandle::new(cycle_id.clone(), Utc::now()));
        self.open_cycles.write().insert(cycle_id, handle.clone());
        handle
    }

    pub fn handle(&self, cycle_id: &str) -> Option<Arc<CycleHandle>> {
        self.open_cycles.read().get(cycle_id).cloned()
    }

    pub fn append_anomaly(
        &self,
        cycle_id: &str,
        agent: &str,
        anomaly: Anomaly,
    ) -> Result<(), SectionError> {
        self.require_handle(cycle_id)?.append_anomaly(agent, anomaly)
    }

    pub fn append_policy_hit(
        &self,
        cycle_id: &str,
        agent: &str,
        hit: PolicyHit,
    ) -> Result<(), SectionError> {
        self.require_handle(cycle_id)?.append_policy_hit(agent, hit)
    }

    pub fn append_risk_signal(
        &self,
        cycle_id: &str,
        agent: &str,
        signal: RiskSignal,
    ) -> Result<(), SectionError> {
        self.require_handle(cycle_id)?.append_risk_signal(agent, signal)
    }

    pub fn append_causal_link(
        &self,
        cycle_id: &str,
        agent: &str,
        link: CausalLink,
    ) -> Result<(), SectionError> {
        self.require_handle(cycle_id)?.append_causal_link(agent, link)
    }

    pub fn append_severity_score(
        &self,
        cycle_id: &str,
        agent: &str,
        score: SeverityScore,
    ) -> Result<(), SectionError> {
        self.require_handle(cycle_id)?.append_severity_score(agent, score)
    }

    pub fn append_recommendation(
        &self,
        cycle_id: &str,
        agent: &str,
        rec: Recommendation,
    ) -> Result<(), SectionError> {
        self.require_handle(cycle_id)?.append_recommendation(agent, rec)
    }

    pub fn append_failure(&self, cycle_id: &str, failure: CycleFailure) {
        if let Some(handle) = self.handle(cycle_id) {
            handle.append_failure(failure);
        }
    }

    pub fn anomalies_snapshot(&self, cycle_id: &str) -> Vec<Anomaly> {
        self.handle(cycle_id).map(|h| h.anomalies_snapshot()).unwrap_or_default()
    }

    pub fn policy_hits_snapshot(&self, cycle_id: &str) -> Vec<PolicyHit> {
        self.handle(cycle_id).map(|h| h.policy_hits_snapshot()).unwrap_or_default()
    }

    pub fn risk_signals_snapshot(&self, cycle_id: &str) -> Vec<RiskSignal> {
        self.handle(cycle_id).map(|h| h.risk_signals_snapshot()).unwrap_or_default()
    }

    pub fn severity_scores_snapshot(&self, cycle_id: &str) -> Vec<SeverityScore> {
        self.handle(cycle_id).map(|h| h.severity_scores_snapshot()).unwrap_or_default()
    }

    /// Seals `cycle_id`, persists the sealed payload, and returns it. A
    /// second call on an already-sealed cycle returns the cached payload
    /// rather than re-sealing.
    pub fn complete_cycle(&self, cycle_id: &str) -> Result<Option<Cycle>, StorageError> {
        let handle = match self.handle(cycle_id) {
            Some(h) => h,
            None => return Ok(self.get_cycle(cycle_id)),
        };

        let sealed = match handle.seal(Utc::now()) {
            Some(cycle) => cycle,
            None => return Ok(self.get_cycle(cycle_id)),
        };

        self.sealed_log.write().append(&sealed)?;
        self.sealed.write().push(sealed.clone());
        self.open_cycles.write().remove(cycle_id);
        Ok(Some(sealed))
    }

    pub fn get_cycle(&self, cycle_id: &str) -> Option<Cycle> {
        self.sealed.read().iter().find(|c| c.cycle_id == cycle_id).cloned()
    }

    /// Most recent `n` sealed cycles, reverse chronological.
    pub fn recent_cycles(&self, n: usize) -> Vec<Cycle> {
        let sealed = self.sealed.read();
        let start = sealed.len().saturating_sub(n);
        sealed[start..].iter().rev().cloned().collect()
    }

    fn require_handle(&self, cycle_id: &str) -> Result<Arc<CycleHandle>, SectionError> {
        self.handle(cycle_id)
            .ok_or_else(|| SectionError::CycleSealed(cycle_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anomaly() -> Anomaly {
        Anomaly {
            anomaly_id: new_id("anom"),
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
    fn complete_cycle_seals_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let board = Blackboard::open(dir.path()).unwrap();

        let handle = board.start_cycle();
        board
            .append_anomaly(&handle.cycle_id, "WorkflowAgent", anomaly())
            .unwrap();

        let sealed = board.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert_eq!(sealed.anomalies.len(), 1);
        assert!(sealed.cycle_sha256.is_some());
        assert!(board.get_cycle(&handle.cycle_id).is_some());
    }

    #[test]
    fn recent_cycles_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cycle_id;
        {
            let board = Blackboard::open(dir.path()).unwrap();
            let handle = board.start_cycle();
            cycle_id = handle.cycle_id.clone();
            board.append_anomaly(&cycle_id, "WorkflowAgent", anomaly()).unwrap();
            board.complete_cycle(&cycle_id).unwrap();
        }

        let reopened = Blackboard::open(dir.path()).unwrap();
        let cycle = reopened.get_cycle(&cycle_id).unwrap();
        assert_eq!(cycle.anomalies.len(), 1);
    }
}
