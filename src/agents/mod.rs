//! Detection, forecast, and causal agents (C4/C5). Phase-1 detection
//! agents run concurrently against a shared, immutable snapshot; Phase-2/3
//! agents run sequentially against the detections the cycle has
//! accumulated so far.

pub mod baseline;
pub mod causal;
pub mod code;
pub mod compliance;
pub mod forecast;
pub mod resource;
pub mod workflow;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::blackboard::Blackboard;
use crate::errors::CycleError;
use crate::models::{Event, Metric};

pub use baseline::AdaptiveBaselineAgent;
pub use causal::CausalAgent;
pub use code::CodeAgent;
pub use compliance::ComplianceAgent;
pub use forecast::RiskForecastAgent;
pub use resource::ResourceAgent;
pub use workflow::WorkflowAgent;

/// A read-only, time-bounded view of recent events/metrics taken at cycle
/// start. Data appended to the Observation Store after the snapshot is
/// taken is invisible to the cycle that owns it.
#[derive(Debug, Clone)]
pub struct ObservationSnapshot {
    pub taken_at: DateTime<Utc>,
    pub events: Vec<Event>,
    pub metrics: Vec<Metric>,
}

impl ObservationSnapshot {
    pub fn events_of_type<'a>(&'a self, event_type: &'a str) -> impl Iterator<Item = &'a Event> {
        self.events.iter().filter(move |e| e.event_type == event_type)
    }

    pub fn metrics_of(&self, resource_id: &str, metric_name: &str) -> Vec<&Metric> {
        let mut matches: Vec<&Metric> = self
            .metrics
            .iter()
            .filter(|m| m.resource_id == resource_id && m.metric_name == metric_name)
            .collect();
        matches.sort_by_key(|m| m.observed_at);
        matches
    }
}

/// A Phase-1 detection agent. Implementors append directly to the
/// blackboard section they own and must never touch the Observation Store
/// (`guards::forbid_agent_event_emission` exists precisely to catch that
/// mistake at the seam if it happens).
#[async_trait]
pub trait DetectionAgent: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect(
        &self,
        cycle_id: &str,
        snapshot: &ObservationSnapshot,
        blackboard: &Blackboard,
    ) -> Result<(), CycleError>;
}
