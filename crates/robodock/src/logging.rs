//! File logging for the `robodock` binary.
//!
//! Stdout belongs to the console and command output, so every log line goes
//! to `<data_dir>/logs/robodock.log`.

use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "ROBODOCK_LOG_FILTER";
pub const LOG_FORMAT_ENV: &str = "ROBODOCK_LOG_FORMAT";
pub const RUN_ID_ENV: &str = "ROBODOCK_RUN_ID";

// Pollers hit the host every couple of seconds; keep the HTTP stack quiet.
const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn";
const LOG_FILE: &str = "robodock.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Where logging settings come from, resolved before anything is installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub format: LogFormat,
    pub run_id: String,
}

impl LogSettings {
    /// `ROBODOCK_LOG_FILTER`, then `RUST_LOG`, then the default filter.
    /// An unknown format falls back to json rather than failing startup.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let filter = lookup(LOG_FILTER_ENV)
            .or_else(|| lookup("RUST_LOG"))
            .filter(|value| EnvFilter::try_new(value).is_ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let format = lookup(LOG_FORMAT_ENV)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default();
        let run_id = lookup(RUN_ID_ENV).unwrap_or_else(new_run_id);
        Self {
            filter,
            format,
            run_id,
        }
    }
}

fn new_run_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("pid-{}-{}", std::process::id(), now)
}

pub struct LoggingHandle {
    pub run_id: String,
    pub guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path) -> anyhow::Result<LoggingHandle> {
    let settings = LogSettings::resolve(|key| std::env::var(key).ok());
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));
    let layer = fmt::layer().with_writer(writer).with_ansi(false);
    let registry = tracing_subscriber::registry().with(EnvFilter::try_new(&settings.filter)?);

    match settings.format {
        LogFormat::Json => registry
            .with(layer.json().flatten_event(true).with_current_span(false))
            .try_init()?,
        LogFormat::Pretty => registry
            .with(layer.pretty().with_file(true).with_line_number(true))
            .try_init()?,
        LogFormat::Compact => registry.with(layer.compact()).try_init()?,
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_dir.join(LOG_FILE).display(),
        format = ?settings.format,
        filter = %settings.filter,
        run_id = %settings.run_id,
        "Logging initialized"
    );

    Ok(LoggingHandle {
        run_id: settings.run_id,
        guard,
    })
}
