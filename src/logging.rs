//! Tracing setup: stderr plus `general.log` and `errors.log` files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const GENERAL_LOG: &str = "general.log";
const ERRORS_LOG: &str = "errors.log";

/// Keeps the file writers flushing. Drop on shutdown.
pub struct LoggingGuard {
    _general: WorkerGuard,
    _errors: WorkerGuard,
}

/// Install the global subscriber.
///
/// `RUST_LOG` filters stderr and `general.log` (default `info`);
/// `errors.log` receives `WARN` and above.
pub fn init(log_dir: &Path) -> Result<LoggingGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let (general_writer, general_guard) =
        tracing_appender::non_blocking(rolling::never(log_dir, GENERAL_LOG));
    let (errors_writer, errors_guard) =
        tracing_appender::non_blocking(rolling::never(log_dir, ERRORS_LOG));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let general_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(general_writer)
        .with_filter(env_filter());

    let errors_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(errors_writer)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(general_layer)
        .with(errors_layer)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    tracing::info!(target: "logging", dir = %log_dir.display(), "Logging initialized");

    Ok(LoggingGuard {
        _general: general_guard,
        _errors: errors_guard,
    })
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
