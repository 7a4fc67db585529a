//! Structured logging setup.
//!
//! The teacher's shipper logs via bare `eprintln!`/`println!` throughout
//! (no structured logging dependency); this is an ambient-stack enrichment
//! pulled from the rest of the pack, not grounded on a teacher file: a
//! long-running orchestrator managing concurrent subprocesses needs
//! correlated, leveled, file-rotated logs rather than line-oriented prints.
//! Wires `tracing` + `tracing-subscriber` (env-filter, JSON formatting for
//! the per-class log files spec.md §6 describes) + `tracing-appender` for
//! non-blocking file writers.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Must be kept alive for the lifetime of the process; dropping it stops
/// the background flush thread for the non-blocking file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initializes a stderr layer (human-readable, for operators attached to a
/// terminal) plus a JSON file layer under `<log_dir>/runner.log` (machine-
/// parseable, matching spec.md §6's "leading `[ISO8601] [LEVEL] [TAG]
/// msg JSON?`" line shape via tracing's JSON formatter).
pub fn init_logging(log_dir: &Path) -> Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "runner.log");
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
    let file_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
