//! Risk Index Tracker (§4.6.2): per-component baseline-20 sums rolled up
//! into a composite 0-100 risk score, tracked across sealed cycles for
//! trend classification.

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::Config;
use crate::models::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskBand {
    Normal,
    Degraded,
    AtRisk,
    Violation,
    Incident,
}

impl RiskBand {
    fn from_score(score: f64) -> Self {
        match score {
            s if s < 30.0 => RiskBand::Normal,
            s if s < 50.0 => RiskBand::Degraded,
            s if s < 70.0 => RiskBand::AtRisk,
            s if s < 85.0 => RiskBand::Violation,
            _ => RiskBand::Incident,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskIndexSnapshot {
    pub cycle_id: String,
    pub workflow_risk: f64,
    pub resource_risk: f64,
    pub compliance_risk: f64,
    pub risk_score: f64,
    pub band: RiskBand,
}

fn workflow_impact(anomaly_type: &str) -> f64 {
    match anomaly_type {
        "MISSING_STEP" => 25.0,
        "WORKFLOW_DELAY" => 15.0,
        "SEQUENCE_VIOLATION" => 20.0,
        _ => 0.0,
    }
}

fn resource_impact(anomaly_type: &str) -> f64 {
    match anomaly_type {
        "SUSTAINED_RESOURCE_CRITICAL" => 30.0,
        "SUSTAINED_RESOURCE_WARNING" => 15.0,
        "RESOURCE_DRIFT" => 10.0,
        _ => 0.0,
    }
}

pub fn compute_snapshot(
    cycle_id: &str,
    anomalies: &[crate::models::Anomaly],
    policy_violation_count: usize,
    weights: (f64, f64, f64),
) -> RiskIndexSnapshot {
    let workflow_risk = (20.0
        + anomalies.iter().map(|a| workflow_impact(&a.anomaly_type) * a.confidence).sum::<f64>())
    .min(100.0);

    let resource_risk = (20.0
        + anomalies.iter().map(|a| resource_impact(&a.anomaly_type) * a.confidence).sum::<f64>())
    .min(100.0);

    let compliance_risk = (20.0 + 20.0 * policy_violation_count as f64).min(100.0);

    let risk_score =
        (weights.0 * workflow_risk + weights.1 * resource_risk + weights.2 * compliance_risk)
            .clamp(0.0, 100.0);

    RiskIndexSnapshot {
        cycle_id: cycle_id.to_string(),
        workflow_risk,
        resource_risk,
        compliance_risk,
        risk_score,
        band: RiskBand::from_score(risk_score),
    }
}

pub fn compute_snapshot_for_cycle(cycle: &Cycle, weights: (f64, f64, f64)) -> RiskIndexSnapshot {
    compute_snapshot(&cycle.cycle_id, &cycle.anomalies, cycle.policy_violation_count(), weights)
}

/// Tracks the risk-score trend across the last N sealed cycles.
pub struct RiskIndexTracker {
    history: RwLock<Vec<RiskIndexSnapshot>>,
    window: usize,
}

impl RiskIndexTracker {
    pub fn new(window: usize) -> Self {
        Self { history: RwLock::new(Vec::new()), window }
    }

    pub fn record(&self, cycle: &Cycle, config: &Config) -> (RiskIndexSnapshot, Trend) {
        let snapshot = compute_snapshot_for_cycle(cycle, config.risk_weights);
        let mut history = self.history.write();
        history.push(snapshot.clone());
        if history.len() > self.window {
            let excess = history.len() - self.window;
            history.drain(0..excess);
        }
        let trend = trend_over(&history, config.risk_trend_epsilon);
        (snapshot, trend)
    }

    pub fn current(&self) -> Option<RiskIndexSnapshot> {
        self.history.read().last().cloned()
    }

    pub fn history(&self) -> Vec<RiskIndexSnapshot> {
        self.history.read().clone()
    }
}

/// Least-squares slope of risk_score over the recorded cycle index.
fn trend_over(history: &[RiskIndexSnapshot], epsilon: f64) -> Trend {
    if history.len() < 2 {
        return Trend::Stable;
    }
    let n = history.len() as f64;
    let xs: Vec<f64> = (0..history.len()).map(|i| i as f64).collect();
    let ys: Vec<f64> = history.iter().map(|s| s.risk_score).collect();
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - x_mean) * (y - y_mean);
        var_x += (x - x_mean).powi(2);
    }
    if var_x == 0.0 {
        return Trend::Stable;
    }
    let slope = cov / var_x;

    if slope > epsilon {
        Trend::Increasing
    } else if slope < -epsilon {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}
