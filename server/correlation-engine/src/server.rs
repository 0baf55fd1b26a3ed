//! HTTP ingest adapter: one POST route per input subject feeding the pipeline.

use std::future::Future;
use std::sync::Arc;

use axum::{
  body::Bytes,
  extract::{Path, State},
  http::StatusCode,
  routing::{get, post},
  Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::EngineError;
use crate::pipeline::{IngestHandle, StatsSnapshot};
use crate::types::{InboundMessage, Subject};

pub struct AppState {
  pub ingest: IngestHandle,
}

pub fn router(ingest: IngestHandle) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/stats", get(stats))
    .route("/ingest/:subject", post(ingest_event))
    .layer(TraceLayer::new_for_http())
    .with_state(Arc::new(AppState { ingest }))
}

/// Serve until `shutdown` resolves; in-flight requests are allowed to finish.
pub async fn serve(
  listener: tokio::net::TcpListener,
  ingest: IngestHandle,
  shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), EngineError> {
  axum::serve(listener, router(ingest))
    .with_graceful_shutdown(shutdown)
    .await?;
  Ok(())
}

pub async fn health() -> &'static str {
  "ok"
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
  Json(state.ingest.stats())
}

/// Accepts the raw body as-is; parsing happens in the pipeline so malformed
/// payloads are counted and skipped there.
pub async fn ingest_event(
  State(state): State<Arc<AppState>>,
  Path(subject): Path<String>,
  body: Bytes,
) -> StatusCode {
  if Subject::from_topic(&subject).is_none() {
    warn!(%subject, "ingest: unknown subject");
    return StatusCode::NOT_FOUND;
  }

  match state
    .ingest
    .submit(InboundMessage::new(subject, body.to_vec()))
    .await
  {
    Ok(()) => StatusCode::ACCEPTED,
    Err(EngineError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
    Err(e) => {
      warn!(error = %e, "ingest: enqueue failed");
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::engine::Engine;
  use crate::pipeline::Pipeline;
  use crate::publish::ChannelPublisher;
  use axum::body::Body;
  use axum::http::Request;
  use tower::ServiceExt;

  fn pipeline() -> (Pipeline, IngestHandle) {
    let config = Config {
      workers: 1,
      sweep_interval_secs: 0,
      ..Config::default()
    };
    let (publisher, _rx) = ChannelPublisher::new();
    Pipeline::start(Arc::new(Engine::new(&config)), Arc::new(publisher), &config)
  }

  fn post(uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
      .method("POST")
      .uri(uri)
      .body(Body::from(body))
      .unwrap()
  }

  #[tokio::test]
  async fn health_ok() {
    let (_pipeline, handle) = pipeline();
    let res = router(handle)
      .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn known_subject_is_accepted() {
    let (_pipeline, handle) = pipeline();
    let res = router(handle)
      .oneshot(post("/ingest/logs.anomalous", r#"{"ship_id":"ship-01"}"#))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
  }

  #[tokio::test]
  async fn malformed_body_is_still_accepted_for_skipping() {
    let (_pipeline, handle) = pipeline();
    let res = router(handle)
      .oneshot(post("/ingest/telemetry.network.anomaly", "not json"))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
  }

  #[tokio::test]
  async fn unknown_subject_is_not_found() {
    let (_pipeline, handle) = pipeline();
    let res = router(handle)
      .oneshot(post("/ingest/metrics.raw", "{}"))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn stats_reports_counters() {
    let (_pipeline, handle) = pipeline();
    let res = router(handle)
      .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), 1 << 16).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["received"], 0);
  }
}
