//! Emit-or-update decision for classified incidents.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::fingerprint::{self, SuppressionKey};
use crate::incident;
use crate::store::{SuppressionOutcome, SuppressionStore};
use crate::types::{IncidentType, NormalizedEvent, SuppressionEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
  /// First sighting inside the window: emit a new incident with this id.
  Emit { key: SuppressionKey, incident_id: String },
  /// Repeat inside the window: fold into the existing incident.
  Suppress { key: SuppressionKey, entry: SuppressionEntry },
}

pub struct Suppressor {
  store: Arc<dyn SuppressionStore>,
}

impl Suppressor {
  pub fn new(store: Arc<dyn SuppressionStore>) -> Self {
    Self { store }
  }

  pub fn decide(
    &self,
    incident_type: IncidentType,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
  ) -> Verdict {
    let key = fingerprint::suppression_key(
      incident_type,
      &event.ship_id,
      &event.metric_name,
      &event.service,
    );
    let candidate = incident::new_incident_id();

    match self.store.record(&key, &candidate, now) {
      SuppressionOutcome::Fresh(entry) => Verdict::Emit {
        key,
        incident_id: entry.incident_id,
      },
      SuppressionOutcome::Duplicate(entry) => {
        debug!(
          incident_id = %entry.incident_id,
          suppressed = entry.suppressed_count,
          incident_type = %incident_type,
          "duplicate suppressed"
        );
        Verdict::Suppress { key, entry }
      }
    }
  }
}
