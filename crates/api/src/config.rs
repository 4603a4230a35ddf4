//! Application configuration loaded from environment variables.

use std::str::FromStr;

use domain::{PolicyConfig, Strategy};
use orchestrator::EngineConfig;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `ALLOCATION_STRATEGY`: `fifo`, `fefo` or `zone` (default: `fifo`)
/// - `PREFERRED_ZONES`: comma-separated zone priority list (default: empty)
/// - `FEFO_FOR_EXPIRING`: FEFO when a candidate unit expires (default: `true`)
/// - `ALLOW_PARTIAL_DEFAULT`: `allowPartial` for jobs that omit it (default: `true`)
/// - `EVENT_CHANNEL_CAPACITY`: broadcast fan-out buffer (default: `1024`)
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub strategy: Strategy,
    pub preferred_zones: Vec<String>,
    pub fefo_for_expiring: bool,
    pub allow_partial_default: bool,
    pub event_channel_capacity: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parsed(&lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            strategy: parsed(&lookup, "ALLOCATION_STRATEGY").unwrap_or(defaults.strategy),
            preferred_zones: lookup("PREFERRED_ZONES")
                .map(|zones| {
                    zones
                        .split(',')
                        .map(str::trim)
                        .filter(|z| !z.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.preferred_zones),
            fefo_for_expiring: parsed(&lookup, "FEFO_FOR_EXPIRING")
                .unwrap_or(defaults.fefo_for_expiring),
            allow_partial_default: parsed(&lookup, "ALLOW_PARTIAL_DEFAULT")
                .unwrap_or(defaults.allow_partial_default),
            event_channel_capacity: parsed(&lookup, "EVENT_CHANNEL_CAPACITY")
                .unwrap_or(defaults.event_channel_capacity),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the orchestrator settings.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            policy: PolicyConfig {
                strategy: self.strategy,
                preferred_zones: self.preferred_zones.clone(),
                fefo_when_expiring: self.fefo_for_expiring,
            },
            allow_partial_default: self.allow_partial_default,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            strategy: Strategy::Fifo,
            preferred_zones: Vec::new(),
            fefo_for_expiring: true,
            allow_partial_default: true,
            event_channel_capacity: 1024,
        }
    }
}
