//! Core engine: runs one event through normalize → correlate → aggregate →
//! suppress → build.
//!
//! All shared state lives in the two stores, so `Engine` is used through `&self`
//! and can be shared across workers behind an `Arc`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::correlation::Correlator;
use crate::error::EngineError;
use crate::incident;
use crate::normalize::{self, Normalizer};
use crate::registry::{DeviceRegistry, StaticRegistry};
use crate::severity;
use crate::store::{CorrelationStore, MemoryCorrelationStore, MemorySuppressionStore, SuppressionStore};
use crate::suppress::{Suppressor, Verdict};
use crate::types::*;

pub struct Engine {
  normalizer: Normalizer,
  correlation_store: Arc<dyn CorrelationStore>,
  suppression_store: Arc<dyn SuppressionStore>,
  correlator: Correlator,
  suppressor: Suppressor,
}

impl Engine {
  /// Engine over in-memory stores, with a static registry built from `config.devices`.
  pub fn new(config: &Config) -> Self {
    let devices = StaticRegistry::new(config.devices.clone());
    let registry: Option<Arc<dyn DeviceRegistry>> = if devices.is_empty() {
      None
    } else {
      debug!(devices = devices.len(), "device registry loaded");
      Some(Arc::new(devices))
    };
    Self::with_stores(
      config,
      Normalizer::new(registry),
      Arc::new(
        MemoryCorrelationStore::new(config.correlation_window(), config.max_related_per_key)
          .with_max_groups(config.max_keys_per_ship),
      ),
      Arc::new(MemorySuppressionStore::new(config.suppression_window())),
    )
  }

  pub fn with_defaults() -> Self {
    Self::new(&Config::default())
  }

  pub fn with_stores(
    config: &Config,
    normalizer: Normalizer,
    correlation_store: Arc<dyn CorrelationStore>,
    suppression_store: Arc<dyn SuppressionStore>,
  ) -> Self {
    Self {
      normalizer,
      correlator: Correlator::new(
        correlation_store.clone(),
        config.rule_order(),
        config.key_includes_service,
        config.correlate_by_ship,
      ),
      suppressor: Suppressor::new(suppression_store.clone()),
      correlation_store,
      suppression_store,
    }
  }

  /// Parse and process one raw message. Only unparseable bodies are errors.
  pub fn process_message(&self, msg: &InboundMessage) -> Result<Decision, EngineError> {
    let raw = normalize::parse_payload(&msg.topic, &msg.payload)?;
    Ok(self.process(&raw, msg.subject(), msg.received_at))
  }

  /// Process an already-parsed payload. `received_at` is the processing time
  /// the windows are measured on.
  pub fn process(
    &self,
    raw: &Map<String, Value>,
    subject: Option<Subject>,
    received_at: DateTime<Utc>,
  ) -> Decision {
    let event = self.normalizer.normalize(raw, subject, received_at);
    self.process_event(&event, received_at)
  }

  pub fn process_event(&self, event: &NormalizedEvent, now: DateTime<Utc>) -> Decision {
    let correlation = self.correlator.correlate(event, now);
    let aggregate = severity::aggregate(event, &correlation.related, &correlation.secondary);

    match self
      .suppressor
      .decide(correlation.incident_type, event, now)
    {
      Verdict::Emit { incident_id, .. } => {
        let incident =
          incident::build_incident(incident_id, event, &correlation, &aggregate, Utc::now());
        info!(
          incident_id = %incident.incident_id,
          incident_type = %incident.incident_type,
          severity = %incident.severity,
          ship_id = %incident.ship_id,
          event_count = incident.event_count,
          "incident created"
        );
        Decision::Created(incident)
      }
      Verdict::Suppress { key, entry } => Decision::Suppressed(incident::build_update(
        event,
        &correlation,
        &aggregate,
        &key,
        &entry,
      )),
    }
  }

  /// Evict expired entries from both stores; returns (correlation, suppression) removals.
  pub fn purge_expired(&self, now: DateTime<Utc>) -> (usize, usize) {
    (
      self.correlation_store.purge_expired(now),
      self.suppression_store.purge_expired(now),
    )
  }

  pub fn correlation_keys(&self) -> usize {
    self.correlation_store.len()
  }

  pub fn suppression_keys(&self) -> usize {
    self.suppression_store.len()
  }
}
