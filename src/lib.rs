//! Cognitive Observability Engine core library.
//!
//! Telemetry ingestion, multi-agent detection, deterministic scoring, and
//! the append-only audit trail that ties them together. The HTTP surface
//! and process wiring live in the `coe-server` binary; this crate is the
//! part of the system that doesn't need a running server to reason about.

pub mod agents;
pub mod blackboard;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod guards;
pub mod ingestion;
pub mod models;
pub mod query;
pub mod scenario;
pub mod scoring;
pub mod store;

pub use blackboard::Blackboard;
pub use config::Config;
pub use coordinator::{CycleCoordinator, CycleOutcome};
pub use ingestion::{IngestOutcome, IngestionPipeline};
pub use query::{QueryAnswer, QueryEngine};
pub use scenario::ScenarioInjector;
pub use store::ObservationStore;
