//! Logging setup.
//!
//! Structured `tracing` output to stderr or a file. Settings come from the
//! CLI flags first, then `TRACKCACHE_LOG`, `TRACKCACHE_LOG_FORMAT` and
//! `TRACKCACHE_LOG_FILE`.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const ENV_LOG: &str = "TRACKCACHE_LOG";
pub const ENV_LOG_FORMAT: &str = "TRACKCACHE_LOG_FORMAT";
pub const ENV_LOG_FILE: &str = "TRACKCACHE_LOG_FILE";

/// Field value carried by events that need operator attention.
///
/// Filtering has no level above ERROR, so critical events are logged at
/// ERROR with `severity = "critical"`.
pub const SEVERITY_CRITICAL: &str = "critical";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per event.
    Json,
    Compact,
}

impl LogFormat {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" => Some(Self::Human),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Minimum level to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
    /// Same filter as `Error`.
    Critical,
}

impl LogLevel {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" | "verbose" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_tracing_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    const fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trackcache=trace",
            Self::Debug => "trackcache=debug",
            Self::Info => "trackcache=info",
            Self::Warn => "trackcache=warn",
            Self::Error | Self::Critical => "trackcache=error",
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LogLevel,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Resolve from CLI flags and the process environment.
    #[must_use]
    pub fn resolve(level_flag: Option<&str>, json_flag: bool, verbose: bool) -> Self {
        Self::resolve_with(level_flag, json_flag, verbose, |key| std::env::var(key).ok())
    }

    /// Resolve with an injectable environment lookup.
    ///
    /// `--verbose` raises a quiet level to debug; an explicit level wins
    /// over it.
    pub fn resolve_with<F>(level_flag: Option<&str>, json_flag: bool, verbose: bool, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_value = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let explicit = level_flag
            .and_then(LogLevel::parse)
            .or_else(|| env_value(ENV_LOG).as_deref().and_then(LogLevel::parse));
        let level = match explicit {
            Some(level) => level,
            None if verbose => LogLevel::Debug,
            None => LogLevel::default(),
        };

        let format = if json_flag {
            LogFormat::Json
        } else {
            env_value(ENV_LOG_FORMAT)
                .as_deref()
                .and_then(LogFormat::parse)
                .unwrap_or_default()
        };

        Self {
            level,
            format,
            file: env_value(ENV_LOG_FILE).map(|v| PathBuf::from(v.trim())),
        }
    }
}

/// Install the global subscriber.
///
/// A second call is a no-op; the first subscriber stays installed. An
/// unopenable log file falls back to stderr.
pub fn init(settings: &LogSettings) {
    let file = settings.file.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("warning: cannot open log file {}: {e}", path.display()))
            .ok()
    });
    let writer = make_writer(file);
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| EnvFilter::new(settings.level.directive()));

    let installed = match settings.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(writer)
            .with_span_events(FmtSpan::CLOSE)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_writer(writer)
            .try_init(),
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(false)
            .without_time()
            .try_init(),
    };
    if installed.is_err() {
        tracing::trace!("Log subscriber already installed");
    }
}

fn make_writer(file: Option<File>) -> BoxMakeWriter {
    match file {
        Some(file) => BoxMakeWriter::new(std::sync::Mutex::new(file)),
        None => BoxMakeWriter::new(std::io::stderr),
    }
}
