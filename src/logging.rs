//! Console and rolling file logging.
//!
//! Library code logs through the `log` macros; the subscriber installed here
//! also records the `poll_cycle` spans opened by the scheduler.

use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;
use crate::error::AppError;

const DEFAULT_FILTER: &str = "intel_hub=info";
const LOG_FILE_PREFIX: &str = "intel-hub";
const KEPT_LOG_FILES: usize = 7;

fn file_writer(config: &Config) -> Result<(NonBlocking, WorkerGuard), AppError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(KEPT_LOG_FILES)
        .build(&config.logs_path)
        .map_err(|e| AppError::ConfigurationError {
            msg: format!(
                "Cannot write logs to '{}': {e}",
                config.logs_path.display()
            ),
        })?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber: stdout plus a daily rotated file under
/// `LOGS_PATH`. `RUST_LOG` overrides the default filter.
///
/// Buffered file output is flushed when the returned guard is dropped, so the
/// caller keeps it alive until shutdown.
pub fn setup_logging(config: &Config) -> Result<WorkerGuard, AppError> {
    let (file, guard) = file_writer(config)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(fmt::layer().with_writer(file).with_ansi(false))
        .try_init()
        .map_err(|e| AppError::ConfigurationError {
            msg: format!("Logging is already initialized: {e}"),
        })?;

    Ok(guard)
}
