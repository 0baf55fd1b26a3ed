//! Stable key computation for correlation and suppression.
//!
//! Fields are length-prefixed before hashing so that two keys are equal exactly
//! when their fields are equal (`"a|b" + "c"` never collides with `"a" + "b|c"`).

use std::fmt;

use serde::Serialize;

use crate::types::{IncidentType, NormalizedEvent};

/// Groups events believed to stem from the same underlying condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CorrelationKey(pub String);

/// Deduplicates repeated incidents of the same classified problem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SuppressionKey(pub String);

impl fmt::Display for CorrelationKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Display for SuppressionKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

fn digest(domain: &str, fields: &[&str]) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(domain.as_bytes());
  for field in fields {
    hasher.update(&(field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
  }
  // First 16 bytes (32 hex chars): compact but collision-resistant.
  let hex = hasher.finalize().to_hex();
  hex[..32].to_string()
}

/// ship_id + event_source + metric_name (+ service when `with_service`).
pub fn correlation_key(event: &NormalizedEvent, with_service: bool) -> CorrelationKey {
  let mut fields = vec![
    event.ship_id.as_str(),
    event.event_source.as_str(),
    event.metric_name.as_str(),
  ];
  if with_service {
    fields.push(event.service.as_str());
  }
  CorrelationKey(format!("corr-{}", digest("correlation", &fields)))
}

/// Store key under which every event of one ship is also indexed.
pub fn ship_key(ship_id: &str) -> CorrelationKey {
  CorrelationKey(format!("ship-{}", digest("ship", &[ship_id])))
}

/// incident_type + ship_id + metric_name + service.
pub fn suppression_key(
  incident_type: IncidentType,
  ship_id: &str,
  metric_name: &str,
  service: &str,
) -> SuppressionKey {
  SuppressionKey(format!(
    "supp-{}",
    digest("suppression", &[incident_type.as_str(), ship_id, metric_name, service])
  ))
}
