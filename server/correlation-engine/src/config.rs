//! Engine configuration with sane defaults.
//!
//! Sources, later wins: `Config::default()` → TOML file → environment.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::correlation::DEFAULT_ORDER;
use crate::error::EngineError;
use crate::publish::RetryPolicy;
use crate::store::DEFAULT_MAX_GROUPS;
use crate::types::IncidentType;

/// Bounds for the correlation window (1 to 30 minutes).
pub const MIN_CORRELATION_WINDOW_SECS: u64 = 60;
pub const MAX_CORRELATION_WINDOW_SECS: u64 = 30 * 60;

/// Tunable windows, pool sizes and classification policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Span within which two events sharing a key are related.
  pub correlation_window_secs: u64,
  /// Span within which a repeat updates the open incident instead of creating one.
  pub suppression_window_secs: u64,
  /// Max events kept per correlation key.
  pub max_related_per_key: usize,
  /// Max distinct correlation keys kept in each ship's index.
  pub max_keys_per_ship: usize,
  /// Include `service` in the correlation key.
  pub key_includes_service: bool,
  /// Also relate events on the same ship across different keys.
  pub correlate_by_ship: bool,
  /// Rule order for classification; `correlated_anomaly` is always the fallback.
  pub classification_order: Vec<IncidentType>,
  /// Worker tasks consuming the input queue.
  pub workers: usize,
  pub queue_capacity: usize,
  pub publish_max_attempts: u32,
  pub publish_base_delay_ms: u64,
  pub publish_max_delay_ms: u64,
  /// Background eviction sweep period; 0 disables the sweep.
  pub sweep_interval_secs: u64,
  /// Static host → ship_id entries for the device registry.
  pub devices: HashMap<String, String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      correlation_window_secs: 300,
      suppression_window_secs: 300,
      max_related_per_key: 16,
      max_keys_per_ship: DEFAULT_MAX_GROUPS,
      key_includes_service: false,
      correlate_by_ship: true,
      classification_order: DEFAULT_ORDER.to_vec(),
      workers: 4,
      queue_capacity: 1024,
      publish_max_attempts: 3,
      publish_base_delay_ms: 100,
      publish_max_delay_ms: 2000,
      sweep_interval_secs: 60,
      devices: HashMap::new(),
    }
  }
}

impl Config {
  /// Load from an optional TOML file, apply environment overrides, validate.
  pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
    let mut config = match path {
      Some(p) => Self::from_toml(&std::fs::read_to_string(p)?)?,
      None => Self::default(),
    };
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_toml(text: &str) -> Result<Self, EngineError> {
    toml::from_str(text).map_err(|e| EngineError::config("toml", e.to_string()))
  }

  /// Override fields from environment variables looked up through `var`.
  pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), EngineError> {
    fn parse<T: std::str::FromStr>(name: &str, raw: String) -> Result<T, EngineError> {
      raw
        .trim()
        .parse()
        .map_err(|_| EngineError::config(name, format!("invalid value {:?}", raw)))
    }

    if let Some(v) = var("CORRELATION_WINDOW_SECS") {
      self.correlation_window_secs = parse("CORRELATION_WINDOW_SECS", v)?;
    }
    if let Some(v) = var("SUPPRESSION_WINDOW_SECS") {
      self.suppression_window_secs = parse("SUPPRESSION_WINDOW_SECS", v)?;
    }
    if let Some(v) = var("WORKERS") {
      self.workers = parse("WORKERS", v)?;
    }
    if let Some(v) = var("QUEUE_CAPACITY") {
      self.queue_capacity = parse("QUEUE_CAPACITY", v)?;
    }
    Ok(())
  }

  pub fn validate(&self) -> Result<(), EngineError> {
    if !(MIN_CORRELATION_WINDOW_SECS..=MAX_CORRELATION_WINDOW_SECS).contains(&self.correlation_window_secs) {
      return Err(EngineError::config(
        "correlation_window_secs",
        format!(
          "must be between {} and {}",
          MIN_CORRELATION_WINDOW_SECS, MAX_CORRELATION_WINDOW_SECS
        ),
      ));
    }
    if self.suppression_window_secs == 0 {
      return Err(EngineError::config("suppression_window_secs", "must be at least 1"));
    }
    if self.workers == 0 {
      return Err(EngineError::config("workers", "must be at least 1"));
    }
    if self.queue_capacity == 0 {
      return Err(EngineError::config("queue_capacity", "must be at least 1"));
    }
    if self.max_related_per_key == 0 {
      return Err(EngineError::config("max_related_per_key", "must be at least 1"));
    }
    if self.max_keys_per_ship == 0 {
      return Err(EngineError::config("max_keys_per_ship", "must be at least 1"));
    }
    if self.publish_max_attempts == 0 {
      return Err(EngineError::config("publish_max_attempts", "must be at least 1"));
    }
    Ok(())
  }

  pub fn correlation_window(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.correlation_window_secs as i64)
  }

  pub fn suppression_window(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.suppression_window_secs as i64)
  }

  /// Classification order with duplicates and the fallback removed.
  pub fn rule_order(&self) -> Vec<IncidentType> {
    let mut order: Vec<IncidentType> = Vec::new();
    for rule in &self.classification_order {
      if *rule != IncidentType::CorrelatedAnomaly && !order.contains(rule) {
        order.push(*rule);
      }
    }
    order
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.publish_max_attempts,
      base_delay: std::time::Duration::from_millis(self.publish_base_delay_ms),
      max_delay: std::time::Duration::from_millis(self.publish_max_delay_ms),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let c = Config::default();
    assert!(c.validate().is_ok());
    assert_eq!(c.correlation_window(), chrono::Duration::minutes(5));
    assert_eq!(c.suppression_window(), chrono::Duration::minutes(5));
    assert_eq!(c.rule_order(), DEFAULT_ORDER.to_vec());
  }

  #[test]
  fn toml_overrides_and_keeps_defaults() {
    let c = Config::from_toml(
      r#"
        correlation_window_secs = 600
        classification_order = ["resource_pressure", "network_issue", "resource_pressure", "correlated_anomaly"]

        [devices]
        "core-sw-01" = "atlas-ship"
      "#,
    )
    .unwrap();
    assert_eq!(c.correlation_window_secs, 600);
    assert_eq!(c.suppression_window_secs, 300);
    assert_eq!(
      c.rule_order(),
      vec![IncidentType::ResourcePressure, IncidentType::NetworkIssue]
    );
    assert_eq!(c.devices.get("core-sw-01").map(String::as_str), Some("atlas-ship"));
  }

  #[test]
  fn unknown_rule_name_is_rejected() {
    let err = Config::from_toml(r#"classification_order = ["bogus"]"#).unwrap_err();
    assert!(err.to_string().contains("toml"));
  }

  #[test]
  fn correlation_window_bounds() {
    let mut c = Config::default();
    c.correlation_window_secs = 59;
    assert!(c.validate().is_err());
    c.correlation_window_secs = 1800;
    assert!(c.validate().is_ok());
    c.correlation_window_secs = 1801;
    assert!(c.validate().is_err());
  }

  #[test]
  fn zero_ship_key_cap_is_rejected() {
    let c = Config {
      max_keys_per_ship: 0,
      ..Config::default()
    };
    assert!(c.validate().unwrap_err().to_string().contains("max_keys_per_ship"));
  }

  #[test]
  fn env_overrides() {
    let mut c = Config::default();
    let env = HashMap::from([
      ("CORRELATION_WINDOW_SECS", "120"),
      ("SUPPRESSION_WINDOW_SECS", "900"),
      ("WORKERS", "8"),
    ]);
    c.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
    assert_eq!(c.correlation_window_secs, 120);
    assert_eq!(c.suppression_window_secs, 900);
    assert_eq!(c.workers, 8);
  }

  #[test]
  fn bad_env_value_is_a_config_error() {
    let mut c = Config::default();
    let err = c
      .apply_env(|k| (k == "WORKERS").then(|| "many".to_string()))
      .unwrap_err();
    assert!(err.to_string().contains("WORKERS"));
  }

  #[test]
  fn retry_policy_from_config() {
    let p = Config::default().retry_policy();
    assert_eq!(p.max_attempts, 3);
    assert_eq!(p.base_delay, std::time::Duration::from_millis(100));
  }
}
