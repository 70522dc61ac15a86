//! Usage: Process-wide tracing setup (stderr + daily rolling file under `<data dir>/logs`).

use crate::shared::error::{AppError, AppResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_DIR_NAME: &str = "logs";
const LOG_FILE_PREFIX: &str = "commandpost.log";
const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Keep the returned guard alive until exit or buffered file
/// output is lost.
pub fn init(data_dir: &Path) -> AppResult<WorkerGuard> {
    let log_dir = data_dir.join(LOG_DIR_NAME);
    std::fs::create_dir_all(&log_dir).map_err(|e| {
        AppError::new(
            "IO_ERROR",
            format!("failed to create log dir {}: {e}", log_dir.display()),
        )
    })?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(fmt::layer().with_ansi(false).with_writer(file_writer));

    // Dependencies logging through `log` end up in the same sinks.
    tracing_log::LogTracer::init()
        .map_err(|e| AppError::new("CONFIG_ERROR", format!("log bridge init failed: {e}")))?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::new("CONFIG_ERROR", format!("tracing init failed: {e}")))?;

    tracing::debug!(log_dir = %log_dir.display(), "logging initialized");
    Ok(guard)
}
