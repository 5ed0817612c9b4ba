//! Tracing setup for the daemon.
//!
//! A headless daemon has no progress bars to coexist with, so this just
//! wires up a compact stdout layer and an optional JSON file layer side by
//! side.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default)]
#[clap(rename_all = "lower")]
#[serde(rename_all = "lowercase")]
pub enum LevelFilter {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LevelFilter {
    fn into_tracing(self) -> tracing::level_filters::LevelFilter {
        match self {
            Self::Off => tracing::level_filters::LevelFilter::OFF,
            Self::Error => tracing::level_filters::LevelFilter::ERROR,
            Self::Warn => tracing::level_filters::LevelFilter::WARN,
            Self::Info => tracing::level_filters::LevelFilter::INFO,
            Self::Debug => tracing::level_filters::LevelFilter::DEBUG,
            Self::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

/// Keeps the file appender's background writer thread alive for the
/// daemon's lifetime; dropping it flushes anything still buffered.
pub struct LogGuard(#[allow(dead_code)] Option<WorkerGuard>);

/// Installs the global tracing subscriber. `log_path` mirrors a config
/// file or `--log-file` flag; when absent, only stdout is written.
pub fn setup_logging(log_path: Option<&Path>, level: LevelFilter) -> anyhow::Result<LogGuard> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_filter(EnvFilter::builder().with_default_directive(level.into_tracing().into()).from_env_lossy());

    let Some(log_path) = log_path else {
        tracing_subscriber::registry().with(stdout_layer).init();
        return Ok(LogGuard(None));
    };

    let log_file = File::create(log_path)?;
    let (file_writer, guard) = tracing_appender::non_blocking(log_file);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(file_writer);

    tracing_subscriber::registry().with(stdout_layer).with(file_layer).init();
    tracing::info!(path = ?log_path, "writing log file");
    Ok(LogGuard(Some(guard)))
}
