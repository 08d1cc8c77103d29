//! Tracing setup for the daemon.
//!
//! Console output always goes to stderr. When [`LoggingConfig::file`] is set a
//! second, ANSI-free layer writes daily-rotated files under the logs dir.

use crate::config::LoggingConfig;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log file name prefix inside the logs directory.
pub const LOG_FILE_PREFIX: &str = "habitual.log";

/// Filter from `RUST_LOG`, falling back to the configured level.
#[must_use]
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file logging is on; dropping it flushes
/// and stops the background writer, so callers keep it for the process
/// lifetime. A second call is a no-op.
pub fn init_tracing(config: &LoggingConfig, logs_dir: &Path) -> Option<WorkerGuard> {
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console);

    if !config.file {
        let _ = registry.try_init();
        return None;
    }

    if let Err(e) = std::fs::create_dir_all(logs_dir) {
        let _ = registry.try_init();
        tracing::warn!("cannot create log directory {}: {e}", logs_dir.display());
        return None;
    }
    let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);
    let _ = registry.with(file).try_init();
    Some(guard)
}
