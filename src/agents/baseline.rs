//! AdaptiveBaselineAgent (§4.4.4): per-(entity, metric) baseline tracking.
//! Profiles live for the lifetime of the process, not just one cycle —
//! this is the one detection agent with state that spans cycles. The
//! profile map is durable: every update appends the profile's new
//! snapshot to `baseline.ndjson` before the in-memory copy changes, and
//! `open` replays that log to rebuild the map on restart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::errors::{CycleError, StorageError};
use crate::models::{new_id, Anomaly, BaselineProfile};
use crate::store::AppendLog;

use super::{DetectionAgent, ObservationSnapshot};

const NAME: &str = "AdaptiveBaselineAgent";
const STDDEV_EPSILON: f64 = 1e-6;

pub struct AdaptiveBaselineAgent {
    config: Arc<Config>,
    profiles: RwLock<HashMap<String, Mutex<BaselineProfile>>>,
    log: Mutex<AppendLog>,
}

impl AdaptiveBaselineAgent {
    /// Opens (or creates) `baseline.ndjson` under `data_dir` and replays it,
    /// so a restart resumes each profile's mean/variance/sample_count
    /// instead of starting every baseline cold.
    pub fn open(config: Arc<Config>, data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let log = AppendLog::open(data_dir.as_ref().join("baseline.ndjson"))?;
        let records: Vec<BaselineProfile> = log.replay()?;

        let mut profiles = HashMap::new();
        for record in records {
            let key = Self::profile_key(&record.entity, &record.metric_name);
            profiles.insert(key, Mutex::new(record));
        }

        Ok(Self {
            config,
            profiles: RwLock::new(profiles),
            log: Mutex::new(log),
        })
    }

    fn profile_key(entity: &str, metric_name: &str) -> String {
        format!("{entity}:{metric_name}")
    }

    /// Returns the z-score if this sample deviates from an already-active
    /// baseline, updating in-process and on-disk state as a side effect
    /// exactly as specified: inactive baselines accumulate silently,
    /// deviating samples never contaminate the running mean/variance (and
    /// so are never persisted either — nothing changed).
    fn observe(&self, entity: &str, metric_name: &str, value: f64) -> Result<Option<f64>, StorageError> {
        let key = Self::profile_key(entity, metric_name);

        if !self.profiles.read().contains_key(&key) {
            self.profiles.write().entry(key.clone()).or_insert_with(|| {
                Mutex::new(BaselineProfile::new(entity.to_string(), metric_name.to_string()))
            });
        }

        let profiles = self.profiles.read();
        let mut profile = profiles.get(&key).expect("just inserted").lock();

        if profile.sample_count < self.config.min_samples {
            let new_count = profile.sample_count + 1;
            let delta = value - profile.mean;
            let new_mean = profile.mean + delta / new_count as f64;
            let delta2 = value - new_mean;
            let m2 = profile.variance * profile.sample_count as f64 + delta * delta2;
            profile.mean = new_mean;
            profile.variance = if new_count > 0 { m2 / new_count as f64 } else { 0.0 };
            profile.sample_count = new_count;
            self.log.lock().append(&*profile)?;
            return Ok(None);
        }

        let stddev = profile.stddev().max(STDDEV_EPSILON);
        let z = (value - profile.mean) / stddev;

        if z.abs() > self.config.deviation_threshold {
            return Ok(Some(z));
        }

        let alpha = self.config.adaptation_rate;
        let new_mean = (1.0 - alpha) * profile.mean + alpha * value;
        profile.variance = (1.0 - alpha) * profile.variance + alpha * (value - new_mean).powi(2);
        profile.mean = new_mean;
        profile.sample_count += 1;
        self.log.lock().append(&*profile)?;
        Ok(None)
    }
}

#[async_trait]
impl DetectionAgent for AdaptiveBaselineAgent {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn detect(
        &self,
        cycle_id: &str,
        snapshot: &ObservationSnapshot,
        blackboard: &crate::blackboard::Blackboard,
    ) -> Result<(), CycleError> {
        let mut metrics = snapshot.metrics.clone();
        metrics.sort_by_key(|m| m.observed_at);

        for metric in &metrics {
            let deviation = self
                .observe(&metric.resource_id, &metric.metric_name, metric.value)
                .map_err(|e| CycleError::AgentFailure { agent: NAME.to_string(), detail: e.to_string() })?;
            if let Some(z) = deviation {
                let confidence = (0.65 + 0.05 * (z.abs() - self.config.deviation_threshold)).min(0.90);
                let anomaly = Anomaly {
                    anomaly_id: new_id("anom"),
                    anomaly_type: "BASELINE_DEVIATION".to_string(),
                    entity: metric.resource_id.clone(),
                    confidence,
                    agent: NAME.to_string(),
                    evidence_ids: vec![metric.metric_id.clone()],
                    description: format!(
                        "{} on {} deviates z={z:.2} from adaptive baseline",
                        metric.metric_name, metric.resource_id
                    ),
                    metadata: Default::default(),
                    timestamp: metric.timestamp,
                };
                blackboard
                    .append_anomaly(cycle_id, NAME, anomaly)
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
    use crate::models::new_id as model_new_id;
    use chrono::{Duration, Utc};

    fn metric_at(resource_id: &str, metric_name: &str, value: f64, secs: i64) -> crate::models::Metric {
        let base = Utc::now();
        crate::models::Metric {
            metric_id: model_new_id("met"),
            resource_id: resource_id.into(),
            metric_name: metric_name.into(),
            value,
            timestamp: base,
            observed_at: base + Duration::seconds(secs),
        }
    }

    #[tokio::test]
    async fn baseline_activates_after_min_samples_then_flags_deviation_without_contamination() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let config = Arc::new(Config::default());
        let agent = AdaptiveBaselineAgent::open(config, dir.path()).unwrap();

        let mut metrics = Vec::new();
        for i in 0..10 {
            metrics.push(metric_at("vm_x", "cpu", 50.0, i));
        }
        metrics.push(metric_at("vm_x", "cpu", 95.0, 10));

        let handle = blackboard.start_cycle();
        let snapshot = ObservationSnapshot { taken_at: Utc::now(), events: vec![], metrics };
        agent.detect(&handle.cycle_id, &snapshot, &blackboard).await.unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert_eq!(sealed.anomalies.len(), 1);
        assert_eq!(sealed.anomalies[0].anomaly_type, "BASELINE_DEVIATION");

        let key = AdaptiveBaselineAgent::profile_key("vm_x", "cpu");
        let profiles = agent.profiles.read();
        let profile = profiles.get(&key).unwrap().lock();
        assert!((profile.mean - 50.0).abs() < 1e-6, "deviating sample must not move the mean");
    }

    #[tokio::test]
    async fn inactive_baseline_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let config = Arc::new(Config::default());
        let agent = AdaptiveBaselineAgent::open(config, dir.path()).unwrap();

        let metrics = (0..5).map(|i| metric_at("vm_y", "cpu", 50.0, i)).collect();
        let handle = blackboard.start_cycle();
        let snapshot = ObservationSnapshot { taken_at: Utc::now(), events: vec![], metrics };
        agent.detect(&handle.cycle_id, &snapshot, &blackboard).await.unwrap();

        let sealed = blackboard.complete_cycle(&handle.cycle_id).unwrap().unwrap();
        assert!(sealed.anomalies.is_empty());
    }

    #[tokio::test]
    async fn reopening_resumes_the_baseline_instead_of_starting_cold() {
        let dir = tempfile::tempdir().unwrap();
        let blackboard = Blackboard::open(dir.path()).unwrap();
        let config = Arc::new(Config::default());

        {
            let agent = AdaptiveBaselineAgent::open(config.clone(), dir.path()).unwrap();
            let metrics = (0..5).map(|i| metric_at("vm_z", "cpu", 50.0, i)).collect();
            let handle = blackboard.start_cycle();
            let snapshot = ObservationSnapshot { taken_at: Utc::now(), events: vec![], metrics };
            agent.detect(&handle.cycle_id, &snapshot, &blackboard).await.unwrap();
            blackboard.complete_cycle(&handle.cycle_id).unwrap();
        }

        let reopened = AdaptiveBaselineAgent::open(config, dir.path()).unwrap();
        let key = AdaptiveBaselineAgent::profile_key("vm_z", "cpu");
        let profiles = reopened.profiles.read();
        let profile = profiles.get(&key).unwrap().lock();
        assert_eq!(profile.sample_count, 5);
        assert!((profile.mean - 50.0).abs() < 1e-6);
    }
}
