//! Process-wide logging, configured explicitly and installed once

use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::diagnostics::{DiagnosticLayer, DiagnosticSink};
use crate::env::EnvSource;

pub const LOG_LEVEL: &str = "log_level";
pub const LOG_FORMAT: &str = "log_format";
/// Prefix of per-module overrides, e.g. `log_level_russh=ERROR`
pub const LOG_LEVEL_PREFIX: &str = "log_level_";

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "full" | "text" => Some(LogFormat::Full),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Map a level name to a filter. Accepts the names operators already use
/// for Python-style loggers (`WARNING`, `CRITICAL`, `NOTSET`).
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_uppercase().as_str() {
        "CRITICAL" | "FATAL" | "ERROR" => Some(LevelFilter::ERROR),
        "WARNING" | "WARN" => Some(LevelFilter::WARN),
        "INFO" => Some(LevelFilter::INFO),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "NOTSET" | "TRACE" => Some(LevelFilter::TRACE),
        "OFF" => Some(LevelFilter::OFF),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: LevelFilter,
    pub format: LogFormat,
    /// Per-target overrides as (target, level)
    pub directives: Vec<(String, LevelFilter)>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Full,
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: LevelFilter, format: LogFormat) -> Self {
        Self {
            level,
            format,
            directives: Vec::new(),
        }
    }

    /// Build from `log_level`, `log_format` and `log_level_<module>`.
    /// Unknown values fall back to the defaults; nothing here is fatal.
    pub fn from_env(env: &impl EnvSource) -> Self {
        let level = env
            .non_empty(LOG_LEVEL)
            .and_then(|v| parse_level(&v))
            .unwrap_or(LevelFilter::INFO);
        let format = env
            .non_empty(LOG_FORMAT)
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or_default();

        let mut directives: Vec<(String, LevelFilter)> = env
            .vars()
            .into_iter()
            .filter_map(|(key, value)| {
                let target = key.strip_prefix(LOG_LEVEL_PREFIX)?;
                if target.is_empty() {
                    return None;
                }
                Some((target.to_string(), parse_level(&value)?))
            })
            .collect();
        directives.sort();

        Self {
            level,
            format,
            directives,
        }
    }

    pub fn with_directive(mut self, target: impl Into<String>, level: LevelFilter) -> Self {
        self.directives.push((target.into(), level));
        self
    }

    /// The filter plus one message per override it could not parse
    fn env_filter(&self) -> (EnvFilter, Vec<String>) {
        let mut filter = EnvFilter::builder()
            .with_default_directive(self.level.into())
            .parse_lossy("");
        let mut rejected = Vec::new();
        for (target, level) in &self.directives {
            match format!("{}={}", target, level).parse::<Directive>() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => rejected.push(format!(
                    "Ignoring log level override for '{}': {}",
                    target, e
                )),
            }
        }
        (filter, rejected)
    }

    /// Install the global subscriber with `sink` capturing foreign error
    /// events. Fails if a subscriber is already installed.
    pub fn install(&self, sink: DiagnosticSink) -> anyhow::Result<()> {
        let timer = ChronoLocal::new(TIMESTAMP_FORMAT.to_string());
        let (filter, rejected) = self.env_filter();
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(DiagnosticLayer::new(sink));

        match self.format {
            LogFormat::Full => registry
                .with(tracing_subscriber::fmt::layer().with_timer(timer))
                .try_init()?,
            LogFormat::Compact => registry
                .with(tracing_subscriber::fmt::layer().compact().with_timer(timer))
                .try_init()?,
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json().with_timer(timer))
                .try_init()?,
        }

        for warning in rejected {
            tracing::warn!("{}", warning);
        }
        Ok(())
    }
}
