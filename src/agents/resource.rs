//! ResourceAgent (§4.4.2): sustained threshold breaches and linear-drift
//! detection over numeric resource metrics.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use statrs::statistics::Statistics;

use crate::config::{Config, ResourceThresholds};
use crate::errors::CycleError;
use crate::models::{new_id, Anomaly, Metric};

use super::{DetectionAgent, ObservationSnapshot};

pub struct ResourceAgent {
    config: Arc<Config>,
}

const NAME: &str = "ResourceAgent";
const DRIFT_SLOPE_THRESHOLD: f64 = 2.0;

impl ResourceAgent {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn thresholds_for(&self, metric_name: &str) -> Option<&ResourceThresholds> {
        match metric_name {
            "cpu_percent" => Some(&self.config.cpu_percent_thresholds),
            "memory_percent" => Some(&self.config.memory_percent_thresholds),
            "network_latency_ms" => Some(&self.config.network_latency_ms_thresholds),
            _ => None,
        }
    }
}

#[async_trait]
impl DetectionAgent for ResourceAgent {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn detect(
        &self,
        cycle_id: &str,
        snapshot: &ObservationSnapshot,
        blackboard: &crate::blackboard::Blackboard,
    ) -> Result<(), CycleError> {
        let mut by_series: HashMap<(&str, &str), Vec<&Metric>> = HashMap::new();
        for metric in &snapshot.metrics {
            by_series
                .entry((metric.resource_id.as_str(), metric.metric_name.as_str()))
                .or_default()
                .push(metric);
        }

        for ((resource_id, metric_name), mut series) in by_series {
            series.sort_by_key(|m| m.observed_at);

            if let Some(thresholds) = self.thresholds_for(metric_name) {
                check_sustained(blackboard, cycle_id, resource_id, metric_name, &series, thresholds)?;
            }

            check_drift(blackboard, cycle_id, resource_id, metric_name, &series, self.config.window_size)?;
        }

        Ok(())
    }
}

fn check_sustained(
    blackboard: &crate::blackboard::Blackboard,
    cycle_id: &str,
    resource_id: &str,
    metric_name: &str,
    series: &[&Metric],
    thresholds: &ResourceThresholds,
) -> Result<(), CycleError> {
    if series.len() < 3 {
        return Ok(());
    }
    let last3 = &series[series.len() - 3..];

    if last3.iter().all(|m| m.value > thresholds.critical) {
        return emit(
            blackboard,
            cycle_id,
            "SUSTAINED_RESOURCE_CRITICAL",
            resource_id,
            last3,
            0.90,
            format!("{metric_name} exceeded critical threshold {} for 3 consecutive readings", thresholds.critical),
        );
    }
    if last3.iter().all(|m| m.value > thresholds.warning) {
        return emit(
            blackboard,
            cycle_id,
            "SUSTAINED_RESOURCE_WARNING",
            resource_id,
            last3,
            0.70,
            format!("{metric_name} exceeded warning threshold {} for 3 consecutive readings", thresholds.warning),
        );
    }
    Ok(())
}

fn check_drift(
    blackboard: &crate::blackboard::Blackboard,
    cycle_id: &str,
    resource_id: &str,
    metric_name: &str,
    series: &[&Metric],
    window_size: usize,
) -> Result<(), CycleError> {
    let window = &series[series.len().saturating_sub(window_size)..];
    if window.len() < 4 {
        return Ok(());
    }

    let xs: Vec<f64> = (0..window.len()).map(|i| i as f64).collect();
    let ys: Vec<f64> = window.iter().map(|m| m.value).collect();

    let x_mean = xs.clone().mean();
    let y_mean = ys.clone().mean();

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - x_mean) * (y - y_mean);
        var_x += (x - x_mean).powi(2);
    }
    if var_x == 0.0 {
        return Ok(());
    }
    let slope = cov / var_x;

    let y_var = ys.clone().variance();
    let r_squared = if y_var > 0.0 {
        (cov * cov) / (var_x * y_var * window.len() as f64)
    } else {
        0.0
    }
    .clamp(0.0, 1.0);

    if slope > DRIFT_SLOPE_THRESHOLD {
        let confidence = (0.60 + 0.20 * r_squared).clamp(0.60, 0.80);
        emit(
            blackboard,
            cycle_id,
            "RESOURCE_DRIFT",
            resource_id,
            window,
            confidence,
            format!("{metric_name} drifting upward, slope {slope:.2} units/sample, R^2 {r_squared:.2}"),
        )?;
    }
    Ok(())
}

fn emit(
    blackboard: &crate::blackboard::Blackboard,
    cycle_id: &str,
    anomaly_type: &str,
    resource_id: &str,
    evidence: &[&Metric],
    confidence: f64,
    description: String,
) -> Result<(), CycleError> {
    let anomaly = Anomaly {
        anomaly_id: new_id("anom"),
        anomaly_type: anomaly_type.to_string(),
        entity: resource_id.to_string(),
        confidence,
        agent: NAME.to_string(),
        evidence_ids: evidence.iter().map(|m| m.metric_id.clone()).collect(),
        description,
        metadata: Default::default(),
        timestamp: evidence.last().map(|m| m.timestamp).unwrap_or_else(chrono::Utc::now),
    };
    blackboard
        .append_anomaly(cycle_id, NAME, anomaly)
        .map_err(|e| CycleError::AgentFailure {
            agent: NAME.to_string(),
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use chrono::{Duration, Utc};

    fn metric_at(resource_id: &str, metric_name: &str, value: f64, secs: i64) -> Metric {
        let base = Utc::now();
        Metric {
            metric_id: new_id("met"),
            resource_id: resource_id.into(),
            metric_name: metric_name.into(),
            value,
            timestamp: base,
            observed_at: base + Duration::seconds(secs),
        }
    }

    #[tokio::test]
    async fn sustained_critical_cascade_is_detected_not_a_single_spike() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let handle = blackboard.start_cycle();
        let config = Arc::new(Config::default());

        let snapshot = ObservationSnapshot {
            taken_at: Utc::now(),
            events: vec![],
            metrics: vec![
                metric_at("vm_2", "cpu_percent", 72.0, 0),
                metric_at("vm_2", "cpu_percent", 88.0, 1),
                metric_at("vm_2", "cpu_percent", 93.0, 2),
                metric_at("vm_2", "cpu_percent", 95.0, 3),
                metric_at("vm_2", "cpu_percent", 96.0, 4),
            ],
        };

        ResourceAgent::new(config)
            .detect(&handle.cycle_id, &snapshot, &blackboard)
            .await
            .unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        let critical: Vec<_> = sealed
            .anomalies
            .iter()
            .filter(|a| a.anomaly_type == "SUSTAINED_RESOURCE_CRITICAL")
            .collect();
        assert_eq!(critical.len(), 1);
        assert!((critical[0].confidence - 0.90).abs() < 1e-9);
        assert_eq!(critical[0].evidence_ids.len(), 3);
    }

    #[tokio::test]
    async fn single_spike_does_not_trigger_sustained_anomaly() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let handle = blackboard.start_cycle();
        let config = Arc::new(Config::default());

        let snapshot = ObservationSnapshot {
            taken_at: Utc::now(),
            events: vec![],
            metrics: vec![
                metric_at("vm_3", "cpu_percent", 30.0, 0),
                metric_at("vm_3", "cpu_percent", 95.0, 1),
                metric_at("vm_3", "cpu_percent", 35.0, 2),
            ],
        };

        ResourceAgent::new(config)
            .detect(&handle.cycle_id, &snapshot, &blackboard)
            .await
            .unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert!(sealed.anomalies.is_empty());
    }
}
