// src/utils/logging.rs
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Sets up the logging framework using tracing_subscriber.
/// Reads log level filters from the `RUST_LOG` environment variable.
/// Defaults to "info" (or "debug" when `debug` is set) if `RUST_LOG` is not set.
///
/// Besides stderr, every event is appended to `<log_dir>/<component>.log`.
/// The returned guard flushes that file on drop and must be held by `main`.
pub fn setup_logging(component: &str, log_dir: &Path, debug: bool) -> Option<WorkerGuard> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(format!("{}.log", component))
        .build(log_dir);

    match appender {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            tracing::debug!("Logging setup complete ({}.log).", component);
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .init();
            tracing::warn!("Could not open log file for {}: {}; logging to stderr only", component, e);
            None
        }
    }
}
