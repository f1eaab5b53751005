//! Cycle Coordinator (C7): drives one reasoning cycle end to end, either on
//! demand (`/analysis/cycle`) or on the periodic tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::agents::{
    AdaptiveBaselineAgent, CausalAgent, CodeAgent, ComplianceAgent, DetectionAgent,
    ObservationSnapshot, ResourceAgent, RiskForecastAgent, WorkflowAgent,
};
use crate::blackboard::Blackboard;
use crate::config::Config;
use crate::errors::StorageError;
use crate::models::{Cycle, CycleFailure};
use crate::scoring::{RecommendationEngine, RiskIndexSnapshot, RiskIndexTracker, SeverityEngineAgent, Trend};
use crate::store::ObservationStore;

pub struct CycleCoordinator {
    store: Arc<ObservationStore>,
    blackboard: Arc<Blackboard>,
    config: Arc<Config>,
    detection_agents: Vec<Arc<dyn DetectionAgent>>,
    risk_tracker: Arc<RiskIndexTracker>,
}

pub struct CycleOutcome {
    pub cycle: Cycle,
    pub risk_snapshot: RiskIndexSnapshot,
    pub trend: Trend,
}

impl CycleCoordinator {
    /// Opens the durable detection agents (currently just the adaptive
    /// baseline's profile log) against `config.data_dir` before wiring up
    /// the rest of the detection roster.
    pub fn new(
        store: Arc<ObservationStore>,
        blackboard: Arc<Blackboard>,
        config: Arc<Config>,
    ) -> Result<Self, StorageError> {
        let detection_agents: Vec<Arc<dyn DetectionAgent>> = vec![
            Arc::new(WorkflowAgent),
            Arc::new(ResourceAgent::new(config.clone())),
            Arc::new(ComplianceAgent::new()),
            Arc::new(AdaptiveBaselineAgent::open(config.clone(), &config.data_dir)?),
            Arc::new(CodeAgent::new(config.clone())),
        ];
        let risk_tracker = Arc::new(RiskIndexTracker::new(20));

        Ok(Self { store, blackboard, config, detection_agents, risk_tracker })
    }

    pub fn risk_tracker(&self) -> Arc<RiskIndexTracker> {
        self.risk_tracker.clone()
    }

    /// Runs one full reasoning cycle: snapshot, start, Phase 1 detection,
    /// Phase 2/3 forecast/causal/severity/recommendation, risk index
    /// update, seal, completion log.
    pub async fn run_cycle(&self) -> CycleOutcome {
        // 1. Snapshot.
        let snapshot = Arc::new(ObservationSnapshot {
            taken_at: chrono::Utc::now(),
            events: self.store.recent_events(self.config.cycle_observation_limit_events),
            metrics: self.store.recent_metrics(self.config.cycle_observation_limit_metrics),
        });

        // 2. StartCycle.
        let handle = self.blackboard.start_cycle();
        let cycle_id = handle.cycle_id.clone();
        info!(cycle_id = %cycle_id, events = snapshot.events.len(), metrics = snapshot.metrics.len(), "cycle started");

        // 3. Phase 1, parallel, bounded worker pool, per-agent deadline.
        self.run_phase1(&cycle_id, snapshot).await;

        // 4. RiskForecastAgent.
        if let Err(e) = RiskForecastAgent.run(&cycle_id, &self.blackboard) {
            self.record_failure(&cycle_id, &e);
        }

        // 5. CausalAgent.
        if let Err(e) = CausalAgent.run(&cycle_id, &self.blackboard) {
            self.record_failure(&cycle_id, &e);
        }

        // 6. SeverityEngine, then RecommendationEngine (reads severity scores).
        if let Err(e) = SeverityEngineAgent.run(&cycle_id, &self.blackboard) {
            self.record_failure(&cycle_id, &e);
        }
        if let Err(e) = RecommendationEngine.run(&cycle_id, &self.blackboard) {
            self.record_failure(&cycle_id, &e);
        }

        // 7. Update Risk Index, reading the blackboard before the cycle
        // seals — §4.7 runs this step ahead of CompleteCycle(). Nothing
        // appends to this cycle's sections between here and the seal below,
        // so scoring against the pre-seal snapshot and the sealed payload
        // are equivalent; the tracker records from the sealed cycle for
        // convenience once it exists.

        // 8. CompleteCycle.
        let sealed = self
            .blackboard
            .complete_cycle(&cycle_id)
            .expect("sealed-cycle log append failure is fatal to the coordinator")
            .expect("handle was just created by this coordinator, seal cannot be a no-op");

        let (risk_snapshot, trend) = self.risk_tracker.record(&sealed, &self.config);

        // 9. Completion notification.
        info!(
            cycle_id = %sealed.cycle_id,
            degraded = sealed.degraded,
            risk_score = risk_snapshot.risk_score,
            "cycle sealed"
        );

        CycleOutcome { cycle: sealed, risk_snapshot, trend }
    }

    async fn run_phase1(&self, cycle_id: &str, snapshot: Arc<ObservationSnapshot>) {
        let mut workers = JoinSet::new();
        let deadline = self.config.phase1_deadline;
        let worker_cap = self.config.phase1_workers.max(1);

        let mut pending: Vec<Arc<dyn DetectionAgent>> = self.detection_agents.clone();
        let mut in_flight = 0usize;

        while !pending.is_empty() || in_flight > 0 {
            while in_flight < worker_cap && !pending.is_empty() {
                let agent = pending.remove(0);
                let cycle_id = cycle_id.to_string();
                let snapshot = snapshot.clone();
                let blackboard = self.blackboard.clone();
                workers.spawn(async move {
                    let agent_name = agent.name();
                    let result = tokio::time::timeout(deadline, agent.detect(&cycle_id, &snapshot, &blackboard)).await;
                    (agent_name, result)
                });
                in_flight += 1;
            }

            let Some(joined) = workers.join_next().await else { break };
            in_flight -= 1;

            match joined {
                Ok((agent_name, Ok(Ok(())))) => {
                    tracing::debug!(agent = agent_name, "phase-1 agent completed");
                }
                Ok((agent_name, Ok(Err(cycle_error)))) => {
                    warn!(agent = agent_name, "phase-1 agent failed: {cycle_error}");
                    self.blackboard.append_failure(
                        cycle_id,
                        CycleFailure { agent: agent_name.to_string(), kind: cycle_error.kind().to_string(), detail: cycle_error.to_string() },
                    );
                }
                Ok((agent_name, Err(_elapsed))) => {
                    warn!(agent = agent_name, deadline_ms = deadline.as_millis(), "phase-1 agent timed out");
                    self.blackboard.append_failure(
                        cycle_id,
                        CycleFailure { agent: agent_name.to_string(), kind: "AgentTimeout".to_string(), detail: format!("exceeded {}ms deadline", deadline.as_millis()) },
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!("phase-1 agent panicked, a guard invariant was violated: {join_error}");
                        std::panic::resume_unwind(join_error.into_panic());
                    }
                    warn!("phase-1 agent task was cancelled: {join_error}");
                }
            }
        }
    }

    fn record_failure(&self, cycle_id: &str, error: &crate::errors::CycleError) {
        warn!(cycle_id, "{error}");
        self.blackboard.append_failure(
            cycle_id,
            CycleFailure { agent: error.agent().to_string(), kind: error.kind().to_string(), detail: error.to_string() },
        );
    }

    pub async fn run_periodic(self: Arc<Self>, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            self.run_cycle().await;
        }
    }
}
