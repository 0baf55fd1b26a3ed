//! Event correlation and incident formation engine.
//!
//! Consumes anomaly events from four subjects (metric anomalies, enriched
//! anomalies, log anomalies, network-device anomalies), normalizes them,
//! correlates related events inside a time window, aggregates severity,
//! suppresses repeats and emits one incident per logical problem.
//!
//! In-memory state only; incident lifecycle after creation belongs downstream.

pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod incident;
pub mod normalize;
pub mod pipeline;
pub mod priority;
pub mod publish;
pub mod registry;
pub mod server;
pub mod severity;
pub mod store;
pub mod suppress;
pub mod types;

pub use config::Config;
pub use engine::Engine;
pub use error::EngineError;
pub use pipeline::{IngestHandle, Pipeline};
pub use types::{Decision, Incident, IncidentType, IncidentUpdate, InboundMessage, NormalizedEvent, Subject};
