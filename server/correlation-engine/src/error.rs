//! Structured error types for the correlation engine.
//!
//! Missing fields and store misses are not errors: the normalizer resolves the
//! former to defaults and the stores return `None` for the latter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  /// The raw message is not a JSON object at all; it is dropped.
  #[error("malformed input on {subject}: {reason}")]
  MalformedInput { subject: String, reason: String },

  #[error("publish to {topic} failed: {reason}")]
  Publish { topic: String, reason: String },

  #[error("config: {field}: {reason}")]
  Config { field: String, reason: String },

  #[error("pipeline is shutting down")]
  ShuttingDown,

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),
}

impl EngineError {
  pub fn malformed(subject: &str, reason: impl Into<String>) -> Self {
    Self::MalformedInput {
      subject: subject.to_string(),
      reason: reason.into(),
    }
  }

  pub fn publish(topic: &str, reason: impl Into<String>) -> Self {
    Self::Publish {
      topic: topic.to_string(),
      reason: reason.into(),
    }
  }

  pub fn config(field: &str, reason: impl Into<String>) -> Self {
    Self::Config {
      field: field.to_string(),
      reason: reason.into(),
    }
  }
}
