//! Structured logging setup.
//!
//! Console output is human-readable by default and JSON when `LOG_JSON=true`.
//! `LOG_FILE=<path>` adds a daily rolling JSON log next to it. The filter comes
//! from `RUST_LOG`, then the `--log-level` flag, then [`DEFAULT_FILTER`].

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor a level is given
pub const DEFAULT_FILTER: &str = "mempool_observer=info,warn";

/// Logging options read from the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl LogSettings {
    /// Read `LOG_FILE` and `LOG_JSON`, keeping the given level
    pub fn from_env(level: Option<String>) -> Self {
        Self {
            level,
            file: std::env::var("LOG_FILE").ok().map(PathBuf::from),
            json: std::env::var("LOG_JSON").map(|v| parse_flag(&v)).unwrap_or(false),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Build the filter from `RUST_LOG`, an explicit level, or the default
pub fn build_filter(level: Option<&str>) -> EnvFilter {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        EnvFilter::new(filter)
    } else if let Some(level) = level {
        EnvFilter::new(level)
    } else {
        EnvFilter::new(DEFAULT_FILTER)
    }
}

/// Install the global subscriber
///
/// # Returns
/// The file writer's guard when file logging is enabled. Keep it alive for the
/// life of the process; dropping it stops the background writer.
///
/// # Errors
/// Fails if the log directory cannot be created or a subscriber is already set.
pub fn init_tracing(settings: &LogSettings) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = build_filter(settings.level.as_deref());

    let console_layer = if settings.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_thread_ids(true).boxed()
    };

    let (file_layer, guard) = match &settings.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;

            let appender = tracing_appender::rolling::daily(
                dir,
                path.file_name().unwrap_or_else(|| OsStr::new("observer.log")),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(json = settings.json, file_logging = settings.file.is_some(), "Tracing initialized");
    Ok(guard)
}
