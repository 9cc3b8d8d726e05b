//! Tracing subscriber setup.
//!
//! Runs log to stderr and to `seqforge.log` in the run's log directory.
//! `RUST_LOG` takes precedence over the `--verbose` default.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

pub const LOG_FILE: &str = "seqforge.log";

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

/// Stderr-only logging for commands that do not run pipelines.
pub fn init_stderr(verbose: bool) {
    let _ = tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Log to stderr and to the run's log file.
///
/// Returns the appender guard, which must be held until the run ends, or
/// `None` when a subscriber was already installed in this process.
pub fn init_run(log_dir: &Path, verbose: bool) -> Result<Option<WorkerGuard>> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let installed = tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init();
    Ok(installed.ok().map(|_| guard))
}
