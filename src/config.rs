//! Environment-driven configuration (§6). Every recognized tunable has a
//! default so the engine runs unconfigured out of the box, matching the
//! teacher codebase's `Config::from_env()` convention.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ResourceThresholds {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub port: u16,

    pub schema_accept_majors: Vec<u32>,
    pub skew_past: Duration,
    pub skew_future: Duration,

    pub window_size: usize,
    pub min_samples: u32,
    pub adaptation_rate: f64,
    pub deviation_threshold: f64,

    pub sustained_window: usize,
    pub cpu_percent_thresholds: ResourceThresholds,
    pub memory_percent_thresholds: ResourceThresholds,
    pub network_latency_ms_thresholds: ResourceThresholds,

    pub phase1_workers: usize,
    pub phase1_deadline: Duration,
    pub cycle_observation_limit_events: usize,
    pub cycle_observation_limit_metrics: usize,
    pub causal_window_seconds: f64,

    pub risk_weights: (f64, f64, f64),
    pub risk_trend_epsilon: f64,

    pub code_hotspot_files: Vec<String>,

    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_burst: u32,

    pub cycle_tick: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            port: 8080,

            schema_accept_majors: vec![1],
            skew_past: Duration::from_secs(24 * 3600),
            skew_future: Duration::from_secs(5 * 60),

            window_size: 50,
            min_samples: 10,
            adaptation_rate: 0.1,
            deviation_threshold: 2.5,

            sustained_window: 3,
            cpu_percent_thresholds: ResourceThresholds {
                warning: 70.0,
                critical: 90.0,
            },
            memory_percent_thresholds: ResourceThresholds {
                warning: 75.0,
                critical: 95.0,
            },
            network_latency_ms_thresholds: ResourceThresholds {
                warning: 200.0,
                critical: 500.0,
            },

            phase1_workers: 4,
            phase1_deadline: Duration::from_secs(5),
            cycle_observation_limit_events: 100,
            cycle_observation_limit_metrics: 100,
            causal_window_seconds: 60.0,

            risk_weights: (0.35, 0.35, 0.30),
            risk_trend_epsilon: 0.5,

            code_hotspot_files: Vec::new(),

            rate_limit_max_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_burst: 20,

            cycle_tick: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let schema_accept_majors = std::env::var("SCHEMA_ACCEPT_MAJORS")
            .ok()
            .map(|v| {
                v.split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect::<Vec<u32>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.schema_accept_majors);

        Ok(Self {
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            port: env_or("PORT", defaults.port),

            schema_accept_majors,
            skew_past: Duration::from_secs(env_or("SKEW_PAST_SECS", defaults.skew_past.as_secs())),
            skew_future: Duration::from_secs(env_or(
                "SKEW_FUTURE_SECS",
                defaults.skew_future.as_secs(),
            )),

            window_size: env_or("WINDOW_SIZE", defaults.window_size),
            min_samples: env_or("MIN_SAMPLES", defaults.min_samples),
            adaptation_rate: env_or("ADAPTATION_RATE", defaults.adaptation_rate),
            deviation_threshold: env_or("DEVIATION_THRESHOLD", defaults.deviation_threshold),

            sustained_window: env_or("SUSTAINED_WINDOW", defaults.sustained_window),
            cpu_percent_thresholds: ResourceThresholds {
                warning: env_or("CPU_WARNING", defaults.cpu_percent_thresholds.warning),
                critical: env_or("CPU_CRITICAL", defaults.cpu_percent_thresholds.critical),
            },
            memory_percent_thresholds: ResourceThresholds {
                warning: env_or("MEMORY_WARNING", defaults.memory_percent_thresholds.warning),
                critical: env_or(
                    "MEMORY_CRITICAL",
                    defaults.memory_percent_thresholds.critical,
                ),
            },
            network_latency_ms_thresholds: ResourceThresholds {
                warning: env_or(
                    "NETWORK_LATENCY_WARNING_MS",
                    defaults.network_latency_ms_thresholds.warning,
                ),
                critical: env_or(
                    "NETWORK_LATENCY_CRITICAL_MS",
                    defaults.network_latency_ms_thresholds.critical,
                ),
            },

            phase1_workers: env_or("PHASE1_WORKERS", defaults.phase1_workers),
            phase1_deadline: Duration::from_millis(env_or(
                "PHASE1_DEADLINE_MS",
                defaults.phase1_deadline.as_millis() as u64,
            )),
            cycle_observation_limit_events: env_or(
                "CYCLE_OBSERVATION_LIMIT_EVENTS",
                defaults.cycle_observation_limit_events,
            ),
            cycle_observation_limit_metrics: env_or(
                "CYCLE_OBSERVATION_LIMIT_METRICS",
                defaults.cycle_observation_limit_metrics,
            ),
            causal_window_seconds: env_or(
                "CAUSAL_WINDOW_SECONDS",
                defaults.causal_window_seconds,
            ),

            risk_weights: defaults.risk_weights,
            risk_trend_epsilon: env_or("RISK_TREND_EPSILON", defaults.risk_trend_epsilon),

            code_hotspot_files: std::env::var("CODE_HOTSPOT_FILES")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.code_hotspot_files),

            rate_limit_max_requests: env_or(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            ),
            rate_limit_window: Duration::from_secs(env_or(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window.as_secs(),
            )),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", defaults.rate_limit_burst),

            cycle_tick: Duration::from_secs(env_or(
                "CYCLE_TICK_SECONDS",
                defaults.cycle_tick.as_secs(),
            )),
        })
    }
}
