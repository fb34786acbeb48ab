//! Structured logging setup. Mirrors the tracing-subscriber wiring used throughout the
//! ambient stack: an `EnvFilter` scoped to this crate's target plus an optional rotated
//! file appender, both rendered with a local-time timestamp.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOGGING_ENABLED_CRATE: &str = "agent_orchestration_core";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),
    #[error("invalid directive `{directive}`: {err}")]
    InvalidDirective { directive: String, err: String },
}

/// Logging configuration: a level for this crate's own target, an optional override that
/// disables target-scoping altogether, and an optional file destination.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub insecure_fine_grained_level: Option<String>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

pub type FileLoggerGuard = Option<WorkerGuard>;

impl LoggingConfig {
    pub fn try_init(&self) -> Result<FileLoggerGuard, LoggingError> {
        let logging_filter = self.logging_filter()?;

        let (file_layer, guard) = match &self.file_path {
            Some(path) => {
                let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "agent-orchestrator.log".to_string());
                let file_appender = tracing_appender::rolling::daily(dir, file_name);
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_timer(ChronoLocal::rfc_3339())
                    .with_filter(self.logging_filter()?);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_timer(ChronoLocal::rfc_3339())
            .with_filter(logging_filter);

        tracing_subscriber::Registry::default()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|err| LoggingError::TryInitError(err.to_string()))?;

        tracing::debug!("logging initialized");
        Ok(guard)
    }

    fn logging_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Some(directive_str) = self
            .insecure_fine_grained_level
            .as_ref()
            .filter(|s| !s.is_empty())
        {
            return EnvFilter::builder()
                .parse(directive_str)
                .map_err(|err| LoggingError::InvalidDirective {
                    directive: directive_str.clone(),
                    err: err.to_string(),
                });
        }
        let level = self.level.as_level().to_string().to_lowercase();
        let directive_str = format!("{LOGGING_ENABLED_CRATE}={level}");
        let directive: Directive =
            directive_str
                .parse()
                .map_err(|err: tracing_subscriber::filter::ParseError| {
                    LoggingError::InvalidDirective {
                        directive: directive_str.clone(),
                        err: err.to_string(),
                    }
                })?;
        Ok(EnvFilter::builder()
            .with_default_directive(LevelFilter::OFF.into())
            .parse_lossy("")
            .add_directive(directive))
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct LogLevel(Level);

impl LogLevel {
    fn as_level(&self) -> Level {
        self.0
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self(Level::INFO)
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Level::from_str(value)
            .map(LogLevel)
            .map_err(|err| LoggingError::InvalidDirective {
                directive: value.to_string(),
                err: err.to_string(),
            })
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value_str = String::deserialize(deserializer)?;
        Level::from_str(&value_str)
            .map(LogLevel)
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for LogLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.as_level().to_string())
    }
}
