//! Logging setup
//!
//! Console output (pretty or JSON) plus an optional non-blocking log file.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level unless `debug` is set. The
/// returned guard flushes the log file when dropped and must be held for the
/// life of the process.
pub fn init(config: &LoggingConfig, debug: bool) -> Result<Option<WorkerGuard>> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level)
                .map_err(|e| Error::config(format!("invalid log level '{}': {e}", config.level)))?,
        }
    };

    let console = match config.format.as_str() {
        "json" => fmt::layer().json().boxed(),
        "pretty" | "text" => fmt::layer().with_target(true).boxed(),
        other => {
            return Err(Error::config(format!(
                "unknown log format '{other}', expected 'pretty' or 'json'"
            )))
        }
    };

    let (file_layer, guard) = match config.file.as_deref().map(str::trim) {
        Some(path) if !path.is_empty() => {
            let (dir, name) = split_log_path(path)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(name)
                .build(&dir)
                .map_err(|e| Error::config(format!("cannot open log file '{path}': {e}")))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::internal(format!("failed to initialize tracing: {e}")))?;

    Ok(guard)
}

fn split_log_path(path: &str) -> Result<(PathBuf, String)> {
    let path = Path::new(path);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::config(format!("log file '{}' has no file name", path.display())))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Ok((dir, name.to_string()))
}
