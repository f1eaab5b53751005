//! Cognitive Observability Engine — server binary.
//!
//! Wires the Observation Store, Ingestion Pipeline, Blackboard, Cycle
//! Coordinator, Scenario Injector, and Query Engine together behind an
//! axum HTTP surface, and drives the periodic cycle tick.

mod api;
mod middleware;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{middleware as axum_mw, Router};
use clap::Parser;
use coe_core::{Blackboard, Config, CycleCoordinator, IngestionPipeline, ObservationStore, QueryEngine, ScenarioInjector};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::rate_limit::{RateLimitConfig, RateLimitLayer};

#[derive(Debug, Parser)]
#[command(name = "coe-server", about = "Cognitive Observability Engine server")]
struct Cli {
    /// Directory for append-only logs (events, metrics, cycles, DLQ).
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<String>,

    /// HTTP listen port.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Run a single cycle at startup and exit, instead of serving.
    #[arg(long)]
    run_once: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ObservationStore>,
    pub pipeline: Arc<IngestionPipeline>,
    pub blackboard: Arc<Blackboard>,
    pub coordinator: Arc<CycleCoordinator>,
    pub injector: Arc<ScenarioInjector>,
    pub query_engine: Arc<QueryEngine>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    let config = Arc::new(config);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    std::fs::create_dir_all(&config.data_dir).context("creating data directory")?;

    let store = Arc::new(ObservationStore::open(&config.data_dir).context("opening observation store")?);
    let pipeline = Arc::new(
        IngestionPipeline::open(&config.data_dir, store.clone(), config.clone()).context("opening ingestion pipeline")?,
    );
    let blackboard = Arc::new(Blackboard::open(&config.data_dir).context("opening blackboard")?);
    let coordinator = Arc::new(
        CycleCoordinator::new(store.clone(), blackboard.clone(), config.clone())
            .context("opening cycle coordinator")?,
    );
    let injector = Arc::new(ScenarioInjector::new(pipeline.clone()));
    let query_engine = Arc::new(QueryEngine::new(blackboard.clone(), coordinator.risk_tracker()));

    let state = AppState { store, pipeline, blackboard, coordinator: coordinator.clone(), injector, query_engine, config: config.clone() };

    if cli.run_once {
        let outcome = state.coordinator.run_cycle().await;
        info!(cycle_id = %outcome.cycle.cycle_id, degraded = outcome.cycle.degraded, "run-once cycle complete");
        return Ok(());
    }

    let tick = config.cycle_tick;
    tokio::spawn(coordinator.run_periodic(tick));

    let rate_limiter = RateLimitLayer::new(RateLimitConfig {
        max_requests: config.rate_limit_max_requests,
        window: config.rate_limit_window,
        burst: config.rate_limit_burst,
    });
    {
        let cleanup_limiter = rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                cleanup_limiter.cleanup();
            }
        });
    }

    let app: Router = api::router()
        .with_state(state)
        .layer(axum_mw::from_fn_with_state(rate_limiter, crate::middleware::rate_limit::rate_limit_middleware))
        .layer(axum_mw::from_fn(crate::middleware::logging::request_logging))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "starting cognitive observability engine");
    let listener = tokio::net::TcpListener::bind(addr).await.context("binding listener")?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("serving http")?;

    Ok(())
}
