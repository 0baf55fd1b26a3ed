//! Binary entrypoint.
//!
//! `run`: read JSON lines from stdin. Each line is an envelope
//! `{"subject": "...", "payload": {...}}`, or a bare payload when `--subject`
//! is given.
//!
//! `serve`: accept `POST /ingest/:subject` over HTTP.
//!
//! Both modes write `{"topic": "...", "payload": {...}}` lines to stdout for
//! every created incident and every suppression update. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use correlation_engine::publish::JsonLinesPublisher;
use correlation_engine::types::InputEnvelope;
use correlation_engine::{server, Config, Engine, InboundMessage, IngestHandle, Pipeline, Subject};

#[derive(Parser)]
#[command(
  name = "correlation-engine",
  about = "Correlate anomaly events into incidents",
  version,
  long_about = None
)]
struct Cli {
  /// TOML configuration file
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Emit logs as JSON
  #[arg(long, global = true)]
  log_json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Read events as JSON lines from stdin
  Run {
    /// Treat every line as a bare payload from this subject
    #[arg(long)]
    subject: Option<String>,
  },

  /// Accept events over HTTP
  Serve {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1:5005")]
    bind: String,
  },
}

fn init_tracing(json: bool) {
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr);
  if json {
    builder.json().init();
  } else {
    builder.init();
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.log_json);

  let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
  let engine = Arc::new(Engine::new(&config));
  let publisher = Arc::new(JsonLinesPublisher::stdout());
  info!(
    correlation_window_secs = config.correlation_window_secs,
    suppression_window_secs = config.suppression_window_secs,
    workers = config.workers,
    "configuration loaded"
  );

  match cli.command {
    Commands::Run { subject } => {
      let subject = match subject {
        Some(s) => match Subject::from_topic(&s) {
          Some(subject) => Some(subject),
          None => bail!("unknown subject {:?}", s),
        },
        None => None,
      };
      let (pipeline, handle) = Pipeline::start(engine, publisher, &config);
      read_stdin(&handle, subject).await?;
      drop(handle);
      pipeline.join().await;
    }
    Commands::Serve { bind } => {
      let (pipeline, handle) = Pipeline::start(engine, publisher, &config);
      let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
      info!(%bind, "correlation-engine listening");
      server::serve(listener, handle, shutdown_signal()).await?;
      pipeline.join().await;
    }
  }

  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!("shutdown requested");
}

/// Feed stdin lines into the pipeline until EOF or ctrl-c.
async fn read_stdin(handle: &IngestHandle, subject: Option<Subject>) -> Result<()> {
  let mut lines = BufReader::new(tokio::io::stdin()).split(b'\n');
  let shutdown = shutdown_signal();
  tokio::pin!(shutdown);

  loop {
    let line = tokio::select! {
      line = lines.next_segment() => line.context("reading stdin")?,
      _ = &mut shutdown => break,
    };
    let Some(line) = line else { break };

    let trimmed = trim(&line);
    if trimmed.is_empty() {
      continue;
    }

    let msg = match subject {
      Some(subject) => InboundMessage::new(subject.topic(), trimmed.to_vec()),
      None => match envelope(trimmed) {
        Some(msg) => msg,
        None => continue,
      },
    };

    if handle.submit(msg).await.is_err() {
      warn!("pipeline closed; stopping input");
      break;
    }
  }
  Ok(())
}

fn trim(bytes: &[u8]) -> &[u8] {
  let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
  let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
  &bytes[start..end]
}

fn envelope(line: &[u8]) -> Option<InboundMessage> {
  let env: InputEnvelope = match serde_json::from_slice(line) {
    Ok(env) => env,
    Err(e) => {
      warn!(error = %e, "malformed input skipped: not an envelope");
      return None;
    }
  };
  if Subject::from_topic(&env.subject).is_none() {
    warn!(subject = %env.subject, "malformed input skipped: unknown subject");
    return None;
  }
  match serde_json::to_vec(&env.payload) {
    Ok(body) => Some(InboundMessage::new(env.subject, body)),
    Err(e) => {
      warn!(error = %e, "malformed input skipped: payload not serializable");
      None
    }
  }
}
