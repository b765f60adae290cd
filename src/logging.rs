//! Tracing subscriber setup.
//!
//! Everything goes to stderr. When a log directory is configured a daily
//! rolling file (`nikki.YYYY-MM-DD.log`) is written as well.

use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`. The returned guard
/// flushes the file writer on drop and must be held for the process
/// lifetime. A second call is a no-op apart from returning a fresh guard.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = build_filter(&config.filter);
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match config.log_dir.as_deref().map(open_appender) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Some(Err(e)) => {
            eprintln!("cannot open log directory, logging to stderr only: {e}");
            (None, None)
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }

    guard
}

fn open_appender(
    dir: &std::path::Path,
) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("nikki")
        .filename_suffix("log")
        .build(dir)
}

fn build_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn init_with_log_dir_returns_guard_and_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let config = LoggingConfig {
            filter: "debug".to_owned(),
            log_dir: Some(log_dir.clone()),
        };

        let guard = init(&config);
        assert!(guard.is_some());
        assert!(log_dir.is_dir());
    }

    #[test]
    fn init_without_log_dir_has_no_guard() {
        let config = LoggingConfig::default();
        assert!(init(&config).is_none());
    }
}
