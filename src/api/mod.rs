//! HTTP surface (§6): ingestion, cycle/reporting, audit, and query
//! endpoints, all operating against the shared `AppState`.

pub mod routes;

pub use routes::router;
