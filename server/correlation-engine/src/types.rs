//! Core types for the correlation engine (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// Subjects (input topics) and output topics
// ---------------------------------------------------------------------------

pub const INCIDENTS_CREATED: &str = "incidents.created";
pub const INCIDENTS_UPDATED: &str = "incidents.updated";

/// One of the four subscribed input subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
  AnomalyDetected,
  AnomalyEnriched,
  LogsAnomalous,
  NetworkAnomaly,
}

impl Subject {
  pub const ALL: [Subject; 4] = [
    Subject::AnomalyDetected,
    Subject::AnomalyEnriched,
    Subject::LogsAnomalous,
    Subject::NetworkAnomaly,
  ];

  pub fn topic(self) -> &'static str {
    match self {
      Self::AnomalyDetected => "anomaly.detected",
      Self::AnomalyEnriched => "anomaly.detected.enriched",
      Self::LogsAnomalous => "logs.anomalous",
      Self::NetworkAnomaly => "telemetry.network.anomaly",
    }
  }

  pub fn from_topic(topic: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|s| s.topic() == topic)
  }

  /// Event source inferred when the payload does not name one.
  pub fn event_source(self) -> &'static str {
    match self {
      Self::AnomalyDetected => "system",
      Self::AnomalyEnriched => "enriched",
      Self::LogsAnomalous => "application",
      Self::NetworkAnomaly => "network",
    }
  }
}

impl fmt::Display for Subject {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.topic())
  }
}

/// One message pulled off an input subject, not yet parsed.
#[derive(Debug, Clone)]
pub struct InboundMessage {
  pub topic: String,
  pub payload: Vec<u8>,
  pub received_at: DateTime<Utc>,
}

impl InboundMessage {
  pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
    Self {
      topic: topic.into(),
      payload: payload.into(),
      received_at: Utc::now(),
    }
  }

  pub fn subject(&self) -> Option<Subject> {
    Subject::from_topic(&self.topic)
  }
}

// ---------------------------------------------------------------------------
// Normalized event
// ---------------------------------------------------------------------------

/// Canonical event after normalization. Required string fields are never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
  pub ship_id: String,
  pub event_source: String,
  pub metric_name: String,
  pub service: String,
  pub severity: String,
  pub metric_value: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub anomaly_score: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tracking_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub correlation_id: Option<String>,
  pub timestamp: DateTime<Utc>,
  /// Original payload, kept as evidence only.
  #[serde(default)]
  pub raw: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
  ApplicationSystemCorrelation,
  NetworkIssue,
  CascadingServiceFailure,
  ResourcePressure,
  CorrelatedAnomaly,
}

impl IncidentType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::ApplicationSystemCorrelation => "application_system_correlation",
      Self::NetworkIssue => "network_issue",
      Self::CascadingServiceFailure => "cascading_service_failure",
      Self::ResourcePressure => "resource_pressure",
      Self::CorrelatedAnomaly => "correlated_anomaly",
    }
  }
}

impl fmt::Display for IncidentType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ---------------------------------------------------------------------------
// Store entries
// ---------------------------------------------------------------------------

/// Recent events recorded under one correlation key (newest last).
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationEntry {
  pub events: Vec<NormalizedEvent>,
  pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuppressionEntry {
  pub incident_id: String,
  pub last_emitted_at: DateTime<Utc>,
  pub suppressed_count: u64,
}

// ---------------------------------------------------------------------------
// Output types (JSON contract)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
  Open,
}

/// Priority counters kept on every incident so assertions never see nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugPriorities {
  pub severity_priority: u8,
  pub related_priority: u8,
  pub secondary_priority: u8,
  pub max_priority: u8,
  pub event_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Incident {
  pub incident_id: String,
  pub correlation_id: String,
  pub incident_type: IncidentType,
  pub title: String,
  pub severity: String,
  pub ship_id: String,
  pub affected_services: Vec<String>,
  pub event_count: usize,
  pub related_events: Vec<NormalizedEvent>,
  pub suppressed_duplicates: u64,
  pub debug_priorities: DebugPriorities,
  pub recommended_actions: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tracking_id: Option<String>,
  pub first_seen: DateTime<Utc>,
  pub last_seen: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
  pub status: IncidentStatus,
}

/// Emitted on `incidents.updated` when a duplicate folds into an open incident.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentUpdate {
  pub incident_id: String,
  pub incident_type: IncidentType,
  pub suppression_key: String,
  pub suppressed_duplicates: u64,
  pub severity: String,
  pub event_count: usize,
  pub last_seen: DateTime<Utc>,
}

/// Outcome of running one event through the pipeline.
#[derive(Debug, Clone)]
pub enum Decision {
  Created(Incident),
  Suppressed(IncidentUpdate),
}

impl Decision {
  pub fn incident_id(&self) -> &str {
    match self {
      Self::Created(i) => &i.incident_id,
      Self::Suppressed(u) => &u.incident_id,
    }
  }

  pub fn topic(&self) -> &'static str {
    match self {
      Self::Created(_) => INCIDENTS_CREATED,
      Self::Suppressed(_) => INCIDENTS_UPDATED,
    }
  }

  pub fn to_json(&self) -> Result<Value, serde_json::Error> {
    match self {
      Self::Created(i) => serde_json::to_value(i),
      Self::Suppressed(u) => serde_json::to_value(u),
    }
  }
}

/// One JSON line on the output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
  pub topic: String,
  pub payload: Value,
}

/// Envelope accepted on stdin when no fixed subject is given.
#[derive(Debug, Clone, Deserialize)]
pub struct InputEnvelope {
  pub subject: String,
  #[serde(default)]
  pub payload: Value,
}
