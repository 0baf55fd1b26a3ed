//! Worker pool: consumes inbound messages from a bounded queue and runs each
//! through the engine and publisher independently.
//!
//! Shutdown is graceful: once every `IngestHandle` is dropped the queue closes,
//! workers drain what is left and exit, and `Pipeline::join` returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::publish::{self, Publisher, RetryPolicy};
use crate::types::{Decision, InboundMessage};

#[derive(Debug, Default)]
pub struct PipelineStats {
  received: AtomicU64,
  malformed: AtomicU64,
  created: AtomicU64,
  suppressed: AtomicU64,
  publish_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
  pub received: u64,
  pub malformed: u64,
  pub created: u64,
  pub suppressed: u64,
  pub publish_failures: u64,
}

impl PipelineStats {
  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      received: self.received.load(Ordering::Relaxed),
      malformed: self.malformed.load(Ordering::Relaxed),
      created: self.created.load(Ordering::Relaxed),
      suppressed: self.suppressed.load(Ordering::Relaxed),
      publish_failures: self.publish_failures.load(Ordering::Relaxed),
    }
  }

  fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }
}

/// Cloneable sender side of the pipeline queue.
#[derive(Clone)]
pub struct IngestHandle {
  tx: mpsc::Sender<InboundMessage>,
  stats: Arc<PipelineStats>,
}

impl IngestHandle {
  /// Enqueue a message, waiting for queue capacity.
  pub async fn submit(&self, msg: InboundMessage) -> Result<(), EngineError> {
    self
      .tx
      .send(msg)
      .await
      .map_err(|_| EngineError::ShuttingDown)?;
    PipelineStats::bump(&self.stats.received);
    Ok(())
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.stats.snapshot()
  }
}

pub struct Pipeline {
  workers: Vec<JoinHandle<()>>,
  sweeper: Option<JoinHandle<()>>,
  stats: Arc<PipelineStats>,
}

impl Pipeline {
  pub fn start(
    engine: Arc<Engine>,
    publisher: Arc<dyn Publisher>,
    config: &Config,
  ) -> (Self, IngestHandle) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let rx = Arc::new(Mutex::new(rx));
    let stats = Arc::new(PipelineStats::default());
    let retry = config.retry_policy();

    let workers = (0..config.workers.max(1))
      .map(|id| {
        let rx = rx.clone();
        let engine = engine.clone();
        let publisher = publisher.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
          loop {
            let next = rx.lock().await.recv().await;
            let Some(msg) = next else { break };
            handle_message(&engine, publisher.as_ref(), &retry, &stats, msg).await;
          }
          debug!(worker = id, "worker stopped");
        })
      })
      .collect();

    let sweeper = (config.sweep_interval_secs > 0)
      .then(|| spawn_sweeper(engine, Duration::from_secs(config.sweep_interval_secs)));

    info!(
      workers = config.workers,
      queue_capacity = config.queue_capacity,
      "pipeline started"
    );

    let handle = IngestHandle {
      tx,
      stats: stats.clone(),
    };
    (
      Self {
        workers,
        sweeper,
        stats,
      },
      handle,
    )
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.stats.snapshot()
  }

  /// Wait for the queue to close and every in-flight message to finish.
  pub async fn join(self) -> StatsSnapshot {
    for worker in self.workers {
      if let Err(e) = worker.await {
        error!(error = %e, "worker task failed");
      }
    }
    if let Some(sweeper) = self.sweeper {
      sweeper.abort();
    }
    let snapshot = self.stats.snapshot();
    info!(
      received = snapshot.received,
      malformed = snapshot.malformed,
      created = snapshot.created,
      suppressed = snapshot.suppressed,
      publish_failures = snapshot.publish_failures,
      "pipeline drained"
    );
    snapshot
  }
}

fn spawn_sweeper(engine: Arc<Engine>, period: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(period);
    // First tick completes immediately.
    ticker.tick().await;
    loop {
      ticker.tick().await;
      let (correlation, suppression) = engine.purge_expired(Utc::now());
      if correlation + suppression > 0 {
        debug!(correlation, suppression, "expired entries swept");
      }
    }
  })
}

/// Run one message end to end. Never panics and never stops the pool.
pub async fn handle_message(
  engine: &Engine,
  publisher: &dyn Publisher,
  retry: &RetryPolicy,
  stats: &PipelineStats,
  msg: InboundMessage,
) {
  let decision = match engine.process_message(&msg) {
    Ok(d) => d,
    Err(e) => {
      warn!(topic = %msg.topic, error = %e, "malformed input skipped");
      PipelineStats::bump(&stats.malformed);
      return;
    }
  };

  match &decision {
    Decision::Created(_) => PipelineStats::bump(&stats.created),
    Decision::Suppressed(_) => PipelineStats::bump(&stats.suppressed),
  }

  let payload = match decision.to_json() {
    Ok(v) => v,
    Err(e) => {
      error!(incident_id = %decision.incident_id(), error = %e, "incident serialization failed");
      PipelineStats::bump(&stats.publish_failures);
      return;
    }
  };

  if publish::publish_with_retry(publisher, retry, decision.topic(), &payload)
    .await
    .is_err()
  {
    PipelineStats::bump(&stats.publish_failures);
  }
}
