//! Correlate an incoming event with recent related events and classify the group.
//!
//! Related events come from two lookups in the correlation store:
//! - primary: prior events under the same correlation key
//! - secondary: prior events on the same ship under any other key, newest one
//!   per key
//!
//! Classification walks the configured rule order; the first matching rule
//! wins and `correlated_anomaly` is the fallback.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::fingerprint::{self, CorrelationKey};
use crate::normalize::{UNKNOWN_SERVICE, UNKNOWN_SHIP};
use crate::store::CorrelationStore;
use crate::types::{IncidentType, NormalizedEvent};

/// Default rule order.
pub const DEFAULT_ORDER: [IncidentType; 4] = [
  IncidentType::ApplicationSystemCorrelation,
  IncidentType::NetworkIssue,
  IncidentType::CascadingServiceFailure,
  IncidentType::ResourcePressure,
];

const NETWORK_KEYWORDS: [&str; 7] = ["network", "snmp", "interface", "if_", "packet", "bandwidth", "link_"];
const RESOURCE_KEYWORDS: [&str; 9] = ["cpu", "memory", "mem_", "disk", "swap", "load", "resource", "filesystem", "inode"];

/// Minimum distinct services for a cascading failure.
const CASCADE_MIN_SERVICES: usize = 3;

#[derive(Debug, Clone)]
pub struct Correlation {
  pub key: CorrelationKey,
  pub incident_type: IncidentType,
  /// Prior events under the same key (oldest first).
  pub related: Vec<NormalizedEvent>,
  /// Prior events on the same ship under other keys (oldest first).
  pub secondary: Vec<NormalizedEvent>,
}

impl Correlation {
  pub fn all_related(&self) -> impl Iterator<Item = &NormalizedEvent> {
    self.related.iter().chain(self.secondary.iter())
  }
}

pub struct Correlator {
  store: Arc<dyn CorrelationStore>,
  order: Vec<IncidentType>,
  key_includes_service: bool,
  correlate_by_ship: bool,
}

impl Correlator {
  pub fn new(
    store: Arc<dyn CorrelationStore>,
    order: Vec<IncidentType>,
    key_includes_service: bool,
    correlate_by_ship: bool,
  ) -> Self {
    Self {
      store,
      order,
      key_includes_service,
      correlate_by_ship,
    }
  }

  pub fn key_for(&self, event: &NormalizedEvent) -> CorrelationKey {
    fingerprint::correlation_key(event, self.key_includes_service)
  }

  /// Look up related events, record `event` for future lookups, then classify.
  /// `now` is the processing time the windows are measured on.
  pub fn correlate(&self, event: &NormalizedEvent, now: DateTime<Utc>) -> Correlation {
    let key = self.key_for(event);

    let related = self
      .store
      .observe(&key, event.clone(), now)
      .map(|entry| entry.events)
      .unwrap_or_default();

    let secondary = if self.correlate_by_ship && event.ship_id != UNKNOWN_SHIP {
      self
        .store
        .observe_grouped(&fingerprint::ship_key(&event.ship_id), &key.0, event.clone(), now)
        .map(|entry| {
          entry
            .events
            .into_iter()
            .filter(|e| self.key_for(e) != key)
            .collect()
        })
        .unwrap_or_default()
    } else {
      Vec::new()
    };

    let incident_type = classify(event, &related, &secondary, &self.order);
    debug!(
      key = %key,
      related = related.len(),
      secondary = secondary.len(),
      incident_type = %incident_type,
      "correlated event"
    );

    Correlation {
      key,
      incident_type,
      related,
      secondary,
    }
  }
}

/// Apply the rules in `order`; the first match wins.
pub fn classify(
  event: &NormalizedEvent,
  related: &[NormalizedEvent],
  secondary: &[NormalizedEvent],
  order: &[IncidentType],
) -> IncidentType {
  let others: Vec<&NormalizedEvent> = related.iter().chain(secondary.iter()).collect();
  order
    .iter()
    .copied()
    .find(|rule| matches_rule(*rule, event, &others))
    .unwrap_or(IncidentType::CorrelatedAnomaly)
}

fn matches_rule(rule: IncidentType, event: &NormalizedEvent, others: &[&NormalizedEvent]) -> bool {
  match rule {
    IncidentType::ApplicationSystemCorrelation => is_application_system_pair(event, others),
    IncidentType::NetworkIssue => is_network(event),
    IncidentType::CascadingServiceFailure => distinct_services(event, others) >= CASCADE_MIN_SERVICES,
    IncidentType::ResourcePressure => contains_any(&event.metric_name, &RESOURCE_KEYWORDS),
    IncidentType::CorrelatedAnomaly => true,
  }
}

fn is_application_system_pair(event: &NormalizedEvent, others: &[&NormalizedEvent]) -> bool {
  let counterpart = match event.event_source.as_str() {
    "system" => "application",
    "application" => "system",
    _ => return false,
  };
  others.iter().any(|e| e.event_source == counterpart)
}

fn is_network(event: &NormalizedEvent) -> bool {
  event.event_source == "network"
    || contains_any(&event.event_source, &["snmp"])
    || contains_any(&event.metric_name, &NETWORK_KEYWORDS)
}

fn distinct_services(event: &NormalizedEvent, others: &[&NormalizedEvent]) -> usize {
  std::iter::once(event)
    .chain(others.iter().copied())
    .map(|e| e.service.as_str())
    .filter(|s| *s != UNKNOWN_SERVICE)
    .collect::<BTreeSet<_>>()
    .len()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
  let h = haystack.to_ascii_lowercase();
  needles.iter().any(|n| h.contains(n))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryCorrelationStore;
  use chrono::{DateTime, Duration, TimeZone, Utc};
  use serde_json::Map;

  fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap() + Duration::seconds(secs)
  }

  fn make_event(source: &str, metric: &str, service: &str, at: i64) -> NormalizedEvent {
    NormalizedEvent {
      ship_id: "ship-01".into(),
      event_source: source.into(),
      metric_name: metric.into(),
      service: service.into(),
      severity: "info".into(),
      metric_value: 0.0,
      anomaly_score: None,
      tracking_id: None,
      correlation_id: None,
      timestamp: t(at),
      raw: Map::new(),
    }
  }

  fn correlator() -> Correlator {
    let store = Arc::new(MemoryCorrelationStore::new(Duration::minutes(5), 16));
    Correlator::new(store, DEFAULT_ORDER.to_vec(), false, true)
  }

  #[test]
  fn application_after_system_on_same_ship() {
    let c = correlator();
    let first = c.correlate(&make_event("system", "cpu_usage", "host", 0), t(0));
    assert_eq!(first.incident_type, IncidentType::ResourcePressure);

    let second = c.correlate(&make_event("application", "request_timeout", "api", 2), t(2));
    assert_eq!(second.incident_type, IncidentType::ApplicationSystemCorrelation);
    assert!(second.related.is_empty());
    assert_eq!(second.secondary.len(), 1);
  }

  #[test]
  fn busy_ship_keeps_the_system_counterpart() {
    let c = correlator();
    let mut sys = make_event("system", "cpu_usage", "host", 0);
    sys.severity = "critical".into();
    c.correlate(&sys, t(0));
    for i in 0..20 {
      c.correlate(&make_event("network", "if_errors", "snmp", 0), t(0));
      c.correlate(&make_event("network", &format!("if_drops_{}", i), "snmp", 0), t(1));
    }
    let app = c.correlate(&make_event("application", "request_timeout", "api", 2), t(2));
    assert_eq!(app.incident_type, IncidentType::ApplicationSystemCorrelation);
    assert!(app.secondary.iter().any(|e| e.event_source == "system" && e.severity == "critical"));
    assert_eq!(app.secondary.len(), 22);
  }

  #[test]
  fn same_key_events_are_not_secondary() {
    let c = correlator();
    c.correlate(&make_event("network", "if_errors", "snmp", 0), t(0));
    let second = c.correlate(&make_event("network", "if_errors", "snmp", 1), t(1));
    assert_eq!(second.related.len(), 1);
    assert!(second.secondary.is_empty());
    assert_eq!(second.incident_type, IncidentType::NetworkIssue);
  }

  #[test]
  fn outside_window_is_not_related() {
    let c = correlator();
    c.correlate(&make_event("system", "cpu_usage", "host", 0), t(0));
    let late = c.correlate(&make_event("system", "cpu_usage", "host", 301), t(301));
    assert!(late.related.is_empty());
    let late_app = c.correlate(&make_event("application", "errors", "api", 700), t(700));
    assert!(late_app.secondary.is_empty());
  }

  #[test]
  fn unknown_ship_skips_ship_lookup() {
    let c = correlator();
    let mut a = make_event("system", "x", "a", 0);
    a.ship_id = UNKNOWN_SHIP.into();
    let mut b = make_event("application", "y", "b", 1);
    b.ship_id = UNKNOWN_SHIP.into();
    c.correlate(&a, t(0));
    let res = c.correlate(&b, t(1));
    assert!(res.secondary.is_empty());
    assert_eq!(res.incident_type, IncidentType::CorrelatedAnomaly);
  }

  #[test]
  fn network_by_source_or_metric() {
    let order = DEFAULT_ORDER.to_vec();
    assert_eq!(classify(&make_event("network", "x", "s", 0), &[], &[], &order), IncidentType::NetworkIssue);
    assert_eq!(classify(&make_event("snmp_poller", "x", "s", 0), &[], &[], &order), IncidentType::NetworkIssue);
    assert_eq!(classify(&make_event("system", "SNMP_timeout", "s", 0), &[], &[], &order), IncidentType::NetworkIssue);
  }

  #[test]
  fn cascading_needs_three_known_services() {
    let order = DEFAULT_ORDER.to_vec();
    let e = make_event("enriched", "latency_p99", "api", 0);
    let two = vec![make_event("enriched", "latency_p99", "db", 0), make_event("enriched", "latency_p99", UNKNOWN_SERVICE, 0)];
    assert_eq!(classify(&e, &two, &[], &order), IncidentType::CorrelatedAnomaly);
    let three = vec![make_event("enriched", "q", "db", 0), make_event("enriched", "q", "cache", 0)];
    assert_eq!(classify(&e, &[], &three, &order), IncidentType::CascadingServiceFailure);
  }

  #[test]
  fn system_pair_beats_network() {
    let order = DEFAULT_ORDER.to_vec();
    let e = make_event("application", "network_errors", "api", 0);
    let related = vec![make_event("system", "cpu", "host", 0)];
    assert_eq!(classify(&e, &related, &[], &order), IncidentType::ApplicationSystemCorrelation);
  }

  #[test]
  fn order_is_configurable() {
    let e = make_event("network", "cpu_usage", "api", 0);
    assert_eq!(classify(&e, &[], &[], &DEFAULT_ORDER), IncidentType::NetworkIssue);
    let resource_first = [IncidentType::ResourcePressure, IncidentType::NetworkIssue];
    assert_eq!(classify(&e, &[], &[], &resource_first), IncidentType::ResourcePressure);
    assert_eq!(classify(&e, &[], &[], &[]), IncidentType::CorrelatedAnomaly);
  }

  #[test]
  fn generic_fallback() {
    let e = make_event("unknown_source", "unknown_metric", UNKNOWN_SERVICE, 0);
    assert_eq!(classify(&e, &[], &[], &DEFAULT_ORDER), IncidentType::CorrelatedAnomaly);
  }
}
