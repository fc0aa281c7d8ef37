//! Tracing setup for the agent binary.

use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;

const DEBUG_ENV: &str = "OTPFILL_DEBUG_LOG";
const FILTER_ENV: &str = "OTPFILL_LOG";
const LOG_FILE_PREFIX: &str = "otpfill-agent.log";

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn env_filter() -> EnvFilter {
    if debug_enabled() {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_env(FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber: stderr always, plus a daily-rolling file
/// when enabled. Hold the returned guard until exit or buffered file lines
/// are lost.
pub fn init_logging(config: &LoggingConfig, default_dir: &Path) -> Option<WorkerGuard> {
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter());

    if !config.file {
        tracing_subscriber::registry().with(stderr).init();
        return None;
    }

    let dir = config.directory.as_deref().unwrap_or(default_dir);
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(env_filter());

    tracing_subscriber::registry().with(stderr).with(file).init();
    Some(guard)
}
