//! Logging setup and the local JSONL transcript.
//!
//! Console output is plain or JSON; when a trace directory is configured,
//! every event is also appended as JSON to `spans-YYYY-MM-DD.jsonl` there,
//! which serves as the per-run transcript of engine activity.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether to output JSON-structured logs to console.
    pub json_logs: bool,
    /// Log level filter used when `RUST_LOG` is unset (e.g. "convoy=info").
    pub log_filter: String,
    /// Directory for local JSONL trace files.
    pub trace_dir: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_filter: "convoy=info,convoy_core=info,convoy_engine=info,convoy_db=warn".into(),
            trace_dir: None,
        }
    }
}

/// Install the global subscriber. Call once, at process start.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let console_layer = if config.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE)
            .boxed()
    };

    // Option<Layer> is itself a Layer (no-op when None)
    let file_layer = if let Some(ref trace_dir) = config.trace_dir {
        std::fs::create_dir_all(trace_dir).context(format!(
            "failed to create trace dir: {}",
            trace_dir.display()
        ))?;

        let path = trace_file_path(trace_dir);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("failed to open trace file: {}", path.display()))?;

        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

/// Today's transcript file inside `trace_dir`.
pub fn trace_file_path(trace_dir: &std::path::Path) -> PathBuf {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    trace_dir.join(format!("spans-{today}.jsonl"))
}
