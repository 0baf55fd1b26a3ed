//! Normalize raw payloads into canonical NormalizedEvent models.
//!
//! Normalization never fails: every required field is resolved through a
//! fallback chain that ends in a documented default.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::EngineError;
use crate::registry::DeviceRegistry;
use crate::types::{NormalizedEvent, Subject};

pub const UNKNOWN_SHIP: &str = "unknown-ship";
pub const UNKNOWN_SOURCE: &str = "unknown_source";
pub const UNKNOWN_METRIC: &str = "unknown_metric";
pub const UNKNOWN_SERVICE: &str = "unknown_service";
pub const DEFAULT_SEVERITY: &str = "info";

const TIMESTAMP_FIELDS: [&str; 3] = ["timestamp", "@timestamp", "event_time"];

/// How far a payload timestamp may run ahead of receive time before it is
/// replaced by receive time.
pub const MAX_FUTURE_SKEW_SECS: i64 = 300;

/// Parse a raw message body into a JSON object.
///
/// This is the only fallible step before normalization: bodies that are not
/// JSON objects cannot be treated as events.
pub fn parse_payload(topic: &str, body: &[u8]) -> Result<Map<String, Value>, EngineError> {
  let value: Value =
    serde_json::from_slice(body).map_err(|e| EngineError::malformed(topic, e.to_string()))?;
  match value {
    Value::Object(map) => Ok(map),
    other => Err(EngineError::malformed(
      topic,
      format!("expected a JSON object, got {}", kind(&other)),
    )),
  }
}

fn kind(v: &Value) -> &'static str {
  match v {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

/// Field normalizer with an optional device registry for host → ship lookups.
#[derive(Clone, Default)]
pub struct Normalizer {
  registry: Option<Arc<dyn DeviceRegistry>>,
}

impl Normalizer {
  pub fn new(registry: Option<Arc<dyn DeviceRegistry>>) -> Self {
    Self { registry }
  }

  /// Resolve every field of `raw`. `received_at` stands in for a missing timestamp.
  pub fn normalize(
    &self,
    raw: &Map<String, Value>,
    subject: Option<Subject>,
    received_at: DateTime<Utc>,
  ) -> NormalizedEvent {
    let ship_id = self
      .resolve_ship(raw)
      .unwrap_or_else(|| defaulted("ship_id", UNKNOWN_SHIP));

    let event_source = string_field(raw, &["event_source"])
      .map(|s| s.to_ascii_lowercase())
      .or_else(|| subject.map(|s| s.event_source().to_string()))
      .unwrap_or_else(|| defaulted("event_source", UNKNOWN_SOURCE));

    let metric_name = string_field(raw, &["metric_name", "metric"])
      .unwrap_or_else(|| defaulted("metric_name", UNKNOWN_METRIC));

    let service = string_field(raw, &["service", "labels.service"])
      .unwrap_or_else(|| defaulted("service", UNKNOWN_SERVICE));

    let severity = string_field(raw, &["severity", "level"])
      .map(|s| s.to_ascii_lowercase())
      .unwrap_or_else(|| defaulted("severity", DEFAULT_SEVERITY));

    let metric_value = number_field(raw, "metric_value").unwrap_or_else(|| {
      debug!(field = "metric_value", default = 0.0, "normalization default");
      0.0
    });

    let timestamp = match TIMESTAMP_FIELDS
      .iter()
      .find_map(|f| lookup(raw, f).and_then(parse_timestamp))
    {
      Some(ts) if ts - received_at > chrono::Duration::seconds(MAX_FUTURE_SKEW_SECS) => {
        debug!(field = "timestamp", claimed = %ts, "future timestamp replaced by receive time");
        received_at
      }
      Some(ts) => ts,
      None => received_at,
    };

    NormalizedEvent {
      ship_id,
      event_source,
      metric_name,
      service,
      severity,
      metric_value,
      anomaly_score: number_field(raw, "anomaly_score"),
      tracking_id: string_field(raw, &["tracking_id"]),
      correlation_id: string_field(raw, &["correlation_id"]),
      timestamp,
      raw: raw.clone(),
    }
  }

  /// Explicit ship_id → registry(host) → host heuristic → labels.instance heuristic.
  fn resolve_ship(&self, raw: &Map<String, Value>) -> Option<String> {
    if let Some(ship) = string_field(raw, &["ship_id"]) {
      return Some(ship);
    }
    let host = string_field(raw, &["host", "hostname"]);
    if let (Some(registry), Some(host)) = (&self.registry, &host) {
      if let Some(ship) = registry.ship_for_host(host).filter(|s| !is_unknown_like(s)) {
        return Some(ship);
      }
    }
    host
      .as_deref()
      .and_then(ship_from_host)
      .or_else(|| string_field(raw, &["labels.instance"]).as_deref().and_then(ship_from_host))
  }
}

fn defaulted(field: &'static str, default: &'static str) -> String {
  debug!(field, default, "normalization default");
  default.to_string()
}

/// `alpha-bridge-01` → `alpha-ship`. Ports (`host:9100`) are stripped first.
pub fn ship_from_host(host: &str) -> Option<String> {
  let host = host.trim();
  let host = host.split(':').next().unwrap_or(host);
  let prefix = host.split('-').next().unwrap_or(host).trim();
  if prefix.is_empty() || is_unknown_like(prefix) {
    return None;
  }
  Some(format!("{}-ship", prefix))
}

/// Placeholder values producers emit instead of leaving a field out.
fn is_unknown_like(s: &str) -> bool {
  let l = s.trim().to_ascii_lowercase();
  l.is_empty()
    || l.starts_with("unknown")
    || matches!(l.as_str(), "null" | "none" | "nil" | "n/a" | "undefined")
}

/// Look a field up as a flat key first (`"labels.instance"`), then as a nested path.
fn lookup<'a>(raw: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
  if let Some(v) = raw.get(path) {
    return Some(v);
  }
  let mut parts = path.split('.');
  let mut current = raw.get(parts.next()?)?;
  for part in parts {
    current = current.as_object()?.get(part)?;
  }
  Some(current)
}

/// First candidate holding a usable string (numbers are stringified).
fn string_field(raw: &Map<String, Value>, candidates: &[&str]) -> Option<String> {
  candidates.iter().find_map(|path| {
    let s = match lookup(raw, path)? {
      Value::String(s) => s.trim().to_string(),
      Value::Number(n) => n.to_string(),
      _ => return None,
    };
    (!is_unknown_like(&s)).then_some(s)
  })
}

fn number_field(raw: &Map<String, Value>, path: &str) -> Option<f64> {
  let n = match lookup(raw, path)? {
    Value::Number(n) => n.as_f64()?,
    Value::String(s) => s.trim().parse::<f64>().ok()?,
    _ => return None,
  };
  n.is_finite().then_some(n)
}

fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
  match v {
    Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
      .ok()
      .map(|t| t.with_timezone(&Utc))
      .or_else(|| s.trim().parse::<f64>().ok().and_then(from_epoch)),
    Value::Number(n) => n.as_f64().and_then(from_epoch),
    _ => None,
  }
}

/// Epoch seconds, or milliseconds when the value is too large to be seconds.
fn from_epoch(n: f64) -> Option<DateTime<Utc>> {
  if !n.is_finite() || n < 0.0 {
    return None;
  }
  if n >= 1e12 {
    DateTime::from_timestamp_millis(n as i64)
  } else {
    DateTime::from_timestamp(n.trunc() as i64, (n.fract() * 1e9) as u32)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::StaticRegistry;
  use chrono::TimeZone;
  use serde_json::json;
  use std::collections::HashMap;

  fn obj(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
  }

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap()
  }

  #[test]
  fn empty_event_gets_all_defaults() {
    let e = Normalizer::default().normalize(&Map::new(), None, now());
    assert_eq!(e.ship_id, "unknown-ship");
    assert_eq!(e.event_source, "unknown_source");
    assert_eq!(e.metric_name, "unknown_metric");
    assert_eq!(e.service, "unknown_service");
    assert_eq!(e.severity, "info");
    assert_eq!(e.metric_value, 0.0);
    assert_eq!(e.timestamp, now());
    assert!(e.tracking_id.is_none());
  }

  #[test]
  fn ship_from_host_heuristic() {
    let raw = obj(json!({"host": "beta-engine-02"}));
    let e = Normalizer::default().normalize(&raw, None, now());
    assert_eq!(e.ship_id, "beta-ship");
    assert_eq!(ship_from_host("alpha-bridge-01").as_deref(), Some("alpha-ship"));
    assert_eq!(ship_from_host("delta-sw-01:161").as_deref(), Some("delta-ship"));
    assert!(ship_from_host("").is_none());
    assert!(ship_from_host("-leading").is_none());
  }

  #[test]
  fn ship_from_labels_instance_nested_or_flat() {
    let nested = obj(json!({"labels": {"instance": "gamma-nav-03:9100"}}));
    let flat = obj(json!({"labels.instance": "gamma-nav-03:9100"}));
    let n = Normalizer::default();
    assert_eq!(n.normalize(&nested, None, now()).ship_id, "gamma-ship");
    assert_eq!(n.normalize(&flat, None, now()).ship_id, "gamma-ship");
  }

  #[test]
  fn explicit_ship_wins_and_unknown_like_is_skipped() {
    let n = Normalizer::default();
    let raw = obj(json!({"ship_id": "ship-01", "host": "beta-engine-02"}));
    assert_eq!(n.normalize(&raw, None, now()).ship_id, "ship-01");
    let raw = obj(json!({"ship_id": "unknown", "host": "beta-engine-02"}));
    assert_eq!(n.normalize(&raw, None, now()).ship_id, "beta-ship");
    let raw = obj(json!({"ship_id": null, "host": "  "}));
    assert_eq!(n.normalize(&raw, None, now()).ship_id, "unknown-ship");
  }

  #[test]
  fn registry_consulted_before_heuristic() {
    let reg = StaticRegistry::new(HashMap::from([("core-sw-01".to_string(), "atlas-ship".to_string())]));
    let n = Normalizer::new(Some(Arc::new(reg)));
    let raw = obj(json!({"host": "core-sw-01"}));
    assert_eq!(n.normalize(&raw, None, now()).ship_id, "atlas-ship");
    let raw = obj(json!({"host": "beta-engine-02"}));
    assert_eq!(n.normalize(&raw, None, now()).ship_id, "beta-ship");
  }

  #[test]
  fn event_source_inferred_from_subject() {
    let n = Normalizer::default();
    let raw = Map::new();
    assert_eq!(n.normalize(&raw, Some(Subject::LogsAnomalous), now()).event_source, "application");
    assert_eq!(n.normalize(&raw, Some(Subject::NetworkAnomaly), now()).event_source, "network");
    let raw = obj(json!({"event_source": "System"}));
    assert_eq!(n.normalize(&raw, Some(Subject::NetworkAnomaly), now()).event_source, "system");
  }

  #[test]
  fn severity_lowercased_with_level_alias() {
    let n = Normalizer::default();
    assert_eq!(n.normalize(&obj(json!({"severity": "CRITICAL"})), None, now()).severity, "critical");
    assert_eq!(n.normalize(&obj(json!({"level": "Warning"})), None, now()).severity, "warning");
    assert_eq!(n.normalize(&obj(json!({"severity": 7})), None, now()).severity, "7");
  }

  #[test]
  fn metric_value_parsed_defensively() {
    let n = Normalizer::default();
    let v = |raw: Value| n.normalize(&obj(raw), None, now()).metric_value;
    assert_eq!(v(json!({"metric_value": 91.5})), 91.5);
    assert_eq!(v(json!({"metric_value": " 42 "})), 42.0);
    assert_eq!(v(json!({"metric_value": "abc"})), 0.0);
    assert_eq!(v(json!({"metric_value": null})), 0.0);
    assert_eq!(v(json!({"metric_value": [1, 2]})), 0.0);
    assert_eq!(v(json!({"metric_value": "NaN"})), 0.0);
  }

  #[test]
  fn timestamp_formats() {
    let n = Normalizer::default();
    let ts = |raw: Value| n.normalize(&obj(raw), None, now()).timestamp;
    let expected = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
    assert_eq!(ts(json!({"timestamp": "2025-01-15T09:00:00Z"})), expected);
    assert_eq!(ts(json!({"@timestamp": expected.timestamp()})), expected);
    assert_eq!(ts(json!({"timestamp": expected.timestamp_millis()})), expected);
    assert_eq!(ts(json!({"timestamp": "yesterday"})), now());
  }

  #[test]
  fn future_timestamp_falls_back_to_receive_time() {
    let n = Normalizer::default();
    let ts = |raw: Value| n.normalize(&obj(raw), None, now()).timestamp;
    assert_eq!(ts(json!({"timestamp": "2099-01-01T00:00:00Z"})), now());
    let slightly_ahead = now() + chrono::Duration::seconds(MAX_FUTURE_SKEW_SECS);
    assert_eq!(ts(json!({"timestamp": slightly_ahead.to_rfc3339()})), slightly_ahead);
    let behind = now() - chrono::Duration::hours(2);
    assert_eq!(ts(json!({"timestamp": behind.to_rfc3339()})), behind);
  }

  #[test]
  fn optional_ids_propagated() {
    let raw = obj(json!({"tracking_id": "trk-9", "correlation_id": "c-1", "anomaly_score": "0.93"}));
    let e = Normalizer::default().normalize(&raw, None, now());
    assert_eq!(e.tracking_id.as_deref(), Some("trk-9"));
    assert_eq!(e.correlation_id.as_deref(), Some("c-1"));
    assert_eq!(e.anomaly_score, Some(0.93));
    assert_eq!(e.raw, raw);
  }

  #[test]
  fn normalization_is_idempotent() {
    let raw = obj(json!({"host": "alpha-bridge-01", "metric_name": "cpu_usage", "severity": "High"}));
    let n = Normalizer::default();
    assert_eq!(n.normalize(&raw, Some(Subject::AnomalyDetected), now()), n.normalize(&raw, Some(Subject::AnomalyDetected), now()));
  }

  #[test]
  fn parse_payload_rejects_non_objects() {
    assert!(parse_payload("logs.anomalous", b"{\"a\":1}").is_ok());
    let err = parse_payload("logs.anomalous", b"[1,2]").unwrap_err();
    assert!(err.to_string().contains("array"));
    assert!(parse_payload("logs.anomalous", b"\xff\xfe").is_err());
    assert!(parse_payload("logs.anomalous", b"not json").is_err());
  }
}
