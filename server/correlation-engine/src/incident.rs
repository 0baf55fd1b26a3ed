//! Assemble incident records and suppression updates.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::correlation::Correlation;
use crate::fingerprint::SuppressionKey;
use crate::severity::Aggregate;
use crate::types::*;

pub fn new_incident_id() -> String {
  format!("inc-{}", Uuid::new_v4().simple())
}

/// Build the record emitted on `incidents.created`.
pub fn build_incident(
  incident_id: String,
  event: &NormalizedEvent,
  correlation: &Correlation,
  aggregate: &Aggregate,
  created_at: DateTime<Utc>,
) -> Incident {
  // Evidence: related events plus the triggering one, oldest first.
  let mut related_events: Vec<NormalizedEvent> = correlation.all_related().cloned().collect();
  related_events.push(event.clone());
  related_events.sort_by_key(|e| e.timestamp);

  let affected_services: Vec<String> = related_events
    .iter()
    .map(|e| e.service.clone())
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect();

  let first_seen = related_events.first().map_or(event.timestamp, |e| e.timestamp);
  let last_seen = related_events.last().map_or(event.timestamp, |e| e.timestamp);

  let correlation_id = event
    .correlation_id
    .clone()
    .unwrap_or_else(|| correlation.key.0.clone());

  let tracking_id = event
    .tracking_id
    .clone()
    .or_else(|| correlation.all_related().find_map(|e| e.tracking_id.clone()));

  let mut priorities = aggregate.priorities;
  priorities.event_count = related_events.len();

  Incident {
    incident_id,
    correlation_id,
    incident_type: correlation.incident_type,
    title: title(correlation.incident_type, event, &aggregate.severity),
    severity: aggregate.severity.clone(),
    ship_id: event.ship_id.clone(),
    affected_services,
    event_count: related_events.len(),
    related_events,
    suppressed_duplicates: 0,
    debug_priorities: priorities,
    recommended_actions: recommended_actions(correlation.incident_type, event),
    tracking_id,
    first_seen,
    last_seen,
    created_at,
    status: IncidentStatus::Open,
  }
}

/// Build the record emitted on `incidents.updated` for a suppressed duplicate.
pub fn build_update(
  event: &NormalizedEvent,
  correlation: &Correlation,
  aggregate: &Aggregate,
  key: &SuppressionKey,
  entry: &SuppressionEntry,
) -> IncidentUpdate {
  IncidentUpdate {
    incident_id: entry.incident_id.clone(),
    incident_type: correlation.incident_type,
    suppression_key: key.0.clone(),
    suppressed_duplicates: entry.suppressed_count,
    severity: aggregate.severity.clone(),
    event_count: aggregate.priorities.event_count,
    last_seen: event.timestamp,
  }
}

fn title(kind: IncidentType, event: &NormalizedEvent, severity: &str) -> String {
  let label = match kind {
    IncidentType::ApplicationSystemCorrelation => "Application/system correlation",
    IncidentType::NetworkIssue => "Network issue",
    IncidentType::CascadingServiceFailure => "Cascading service failure",
    IncidentType::ResourcePressure => "Resource pressure",
    IncidentType::CorrelatedAnomaly => "Correlated anomaly",
  };
  format!(
    "{}: {} on {} ({}, {})",
    label, event.metric_name, event.ship_id, event.service, severity
  )
}

fn recommended_actions(kind: IncidentType, event: &NormalizedEvent) -> Vec<String> {
  let mut actions: Vec<String> = Vec::new();
  match kind {
    IncidentType::ApplicationSystemCorrelation => {
      actions.push(format!(
        "Check host resource metrics on {} around the application errors",
        event.ship_id
      ));
      actions.push("Confirm whether the application symptoms started after the system anomaly".into());
    }
    IncidentType::NetworkIssue => {
      actions.push("Check interface counters and link state on the reporting device".into());
      actions.push(format!("Verify satellite/WAN connectivity for {}", event.ship_id));
    }
    IncidentType::CascadingServiceFailure => {
      actions.push("Identify the first failing service in the timeline".into());
      actions.push("Check shared dependencies (database, cache, message bus)".into());
    }
    IncidentType::ResourcePressure => {
      actions.push(format!("Inspect top consumers of {} on the affected host", event.metric_name));
      actions.push("Check for runaway processes or recent load changes".into());
    }
    IncidentType::CorrelatedAnomaly => {
      actions.push("Review the related events for a common cause".into());
    }
  }
  if event.service != crate::normalize::UNKNOWN_SERVICE {
    actions.push(format!("Review recent logs for service {}", event.service));
  }
  actions
}
