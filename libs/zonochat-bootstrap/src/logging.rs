use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Noisy dependencies capped below the configured level.
const QUIET_DEPS: &str = "sqlx=warn,sea_orm=warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `zonochat_migrate=debug`.
    pub level: String,
    /// Console format. Console output goes to stderr.
    pub format: LogFormat,
    /// Optional JSON-lines log file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directive}': {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("log file path has no file name: {}", path.display())]
    FilePath { path: PathBuf },
    #[error("failed to create log directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("logging is already initialized")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Filter directive from the configured level and `-v` count.
///
/// `-v` info, `-vv` debug, `-vvv` trace; without `-v` the configured level
/// applies. `RUST_LOG` takes precedence over both (see [`init_logging`]).
#[must_use]
pub fn filter_directive(configured: &str, verbose: u8) -> String {
    let level = match verbose {
        0 => configured,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("{level},{QUIET_DEPS}")
}

/// Install the global subscriber.
///
/// Returns the file writer guard when a log file is configured; keep it alive
/// until the process exits so buffered lines are flushed.
///
/// # Errors
/// Returns `LoggingError` for an invalid filter, an unusable log file path,
/// or when a subscriber is already installed.
pub fn init_logging(
    cfg: &LoggingConfig,
    verbose: u8,
) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directive) if !directive.trim().is_empty() => parse_filter(&directive)?,
        _ => parse_filter(&filter_directive(&cfg.level, verbose))?,
    };

    let (text_layer, json_layer) = match cfg.format {
        LogFormat::Text => (
            Some(fmt::layer().with_writer(std::io::stderr).with_target(false)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    let (file_layer, guard) = match &cfg.file {
        Some(path) => {
            let name = path
                .file_name()
                .ok_or_else(|| LoggingError::FilePath { path: path.clone() })?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), PathBuf::from);
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(
        json = cfg.format == LogFormat::Json,
        file = cfg.file.is_some(),
        "logging initialized"
    );
    Ok(guard)
}

fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|source| LoggingError::Filter {
        directive: directive.to_owned(),
        source,
    })
}
