//! Fold the severities of an event and its related events into one incident severity.

use crate::priority;
use crate::types::{DebugPriorities, NormalizedEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
  pub severity: String,
  pub priorities: DebugPriorities,
}

/// Highest priority among `labels`, defaulting to the lowest when there are none.
pub fn max_priority<'a>(labels: impl IntoIterator<Item = Option<&'a str>>) -> u8 {
  labels
    .into_iter()
    .map(priority::priority_of)
    .max()
    .unwrap_or(priority::LOWEST)
}

/// Label for the maximum priority among `labels`.
///
/// Among recognized labels at the maximum, the higher-ranked one wins
/// (`medium` over `warning`); with none recognized the canonical label is used.
pub fn label_for<'a>(labels: impl IntoIterator<Item = Option<&'a str>> + Clone) -> String {
  let max = max_priority(labels.clone());
  labels
    .into_iter()
    .flatten()
    .filter(|l| priority::priority_of(Some(*l)) == max)
    .filter_map(|l| priority::rank_of(l).map(|r| (r, l)))
    .min_by_key(|(r, _)| *r)
    .map(|(_, l)| l.trim().to_ascii_lowercase())
    .unwrap_or_else(|| priority::canonical_label(max).to_string())
}

/// Aggregate severity over the new event, its same-key related events and its
/// same-ship secondary events.
pub fn aggregate(
  event: &NormalizedEvent,
  related: &[NormalizedEvent],
  secondary: &[NormalizedEvent],
) -> Aggregate {
  let severity_priority = priority::priority_of(Some(event.severity.as_str()));
  let related_priority = max_priority(related.iter().map(|e| Some(e.severity.as_str())));
  let secondary_priority = max_priority(secondary.iter().map(|e| Some(e.severity.as_str())));
  let max = severity_priority.max(related_priority).max(secondary_priority);

  let labels: Vec<Option<&str>> = std::iter::once(event)
    .chain(related)
    .chain(secondary)
    .map(|e| Some(e.severity.as_str()))
    .collect();

  Aggregate {
    severity: label_for(labels.iter().copied()),
    priorities: DebugPriorities {
      severity_priority,
      related_priority,
      secondary_priority,
      max_priority: max,
      event_count: 1 + related.len() + secondary.len(),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use serde_json::Map;

  fn ev(severity: &str) -> NormalizedEvent {
    NormalizedEvent {
      ship_id: "ship-01".into(),
      event_source: "system".into(),
      metric_name: "cpu_usage".into(),
      service: "api".into(),
      severity: severity.into(),
      metric_value: 0.0,
      anomaly_score: None,
      tracking_id: None,
      correlation_id: None,
      timestamp: Utc::now(),
      raw: Map::new(),
    }
  }

  #[test]
  fn max_wins() {
    let agg = aggregate(&ev("high"), &[], &[ev("critical")]);
    assert_eq!(agg.severity, "critical");
    assert_eq!(agg.priorities.severity_priority, 3);
    assert_eq!(agg.priorities.related_priority, 1);
    assert_eq!(agg.priorities.secondary_priority, 4);
    assert_eq!(agg.priorities.max_priority, 4);
    assert_eq!(agg.priorities.event_count, 2);
  }

  #[test]
  fn defaults_never_fail() {
    let agg = aggregate(&ev("info"), &[ev("info")], &[]);
    assert_eq!(agg.severity, "info");
    assert_eq!(agg.priorities.max_priority, 1);
    assert_eq!(max_priority([None, None]), 1);
    assert_eq!(max_priority(std::iter::empty()), 1);
  }

  #[test]
  fn unknown_labels_map_to_canonical() {
    let agg = aggregate(&ev("error"), &[ev("bogus")], &[]);
    assert_eq!(agg.severity, "info");
    assert_eq!(agg.priorities.max_priority, 1);
  }

  #[test]
  fn ties_prefer_higher_ranked_label() {
    assert_eq!(label_for([Some("warning"), Some("medium")]), "medium");
    assert_eq!(label_for([Some("warning"), Some("info")]), "warning");
    assert_eq!(label_for([Some("debug"), Some("info")]), "info");
    assert_eq!(label_for([None, Some("Critical")]), "critical");
  }
}
