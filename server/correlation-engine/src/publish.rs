//! Output publishing with bounded exponential backoff.
//!
//! A publish that still fails after the last attempt is logged at error level
//! with its full payload and reported to the caller; processing continues.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

use crate::error::EngineError;
use crate::types::OutputRecord;

#[async_trait]
pub trait Publisher: Send + Sync {
  async fn publish(&self, topic: &str, payload: &Value) -> Result<(), EngineError>;
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_millis(100),
      max_delay: Duration::from_secs(2),
    }
  }
}

impl RetryPolicy {
  /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }
}

/// Publish once, retrying failures per `policy`. Returns the attempts used.
pub async fn publish_with_retry(
  publisher: &dyn Publisher,
  policy: &RetryPolicy,
  topic: &str,
  payload: &Value,
) -> Result<u32, EngineError> {
  let attempts = policy.max_attempts.max(1);
  let mut attempt = 1;
  loop {
    match publisher.publish(topic, payload).await {
      Ok(()) => return Ok(attempt),
      Err(e) if attempt < attempts => {
        let delay = policy.delay_for(attempt);
        warn!(%topic, attempt, ?delay, error = %e, "publish failed, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(e) => {
        error!(
          %topic,
          attempts,
          error = %e,
          payload = %payload,
          "publish failed permanently; payload logged for manual recovery"
        );
        return Err(e);
      }
    }
  }
}

// ---------------------------------------------------------------------------
// Publishers
// ---------------------------------------------------------------------------

/// Writes one `{"topic": ..., "payload": ...}` JSON line per record.
pub struct JsonLinesPublisher {
  out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLinesPublisher {
  pub fn new(out: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
    Self {
      out: Mutex::new(out),
    }
  }

  pub fn stdout() -> Self {
    Self::new(Box::new(tokio::io::stdout()))
  }
}

#[async_trait]
impl Publisher for JsonLinesPublisher {
  async fn publish(&self, topic: &str, payload: &Value) -> Result<(), EngineError> {
    let record = OutputRecord {
      topic: topic.to_string(),
      payload: payload.clone(),
    };
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');

    let mut out = self.out.lock().await;
    out
      .write_all(&line)
      .await
      .map_err(|e| EngineError::publish(topic, e.to_string()))?;
    out
      .flush()
      .await
      .map_err(|e| EngineError::publish(topic, e.to_string()))
  }
}

/// In-process publisher feeding an unbounded channel (embedding and tests).
pub struct ChannelPublisher {
  tx: mpsc::UnboundedSender<OutputRecord>,
}

impl ChannelPublisher {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<OutputRecord>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

#[async_trait]
impl Publisher for ChannelPublisher {
  async fn publish(&self, topic: &str, payload: &Value) -> Result<(), EngineError> {
    self
      .tx
      .send(OutputRecord {
        topic: topic.to_string(),
        payload: payload.clone(),
      })
      .map_err(|_| EngineError::publish(topic, "receiver dropped"))
  }
}
