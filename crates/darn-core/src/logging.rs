//! # Structured Logging
//!
//! Installs the global `tracing` subscriber for the driver process.
//!
//! The control path logs configuration changes at `info`, per-pulse
//! scheduling at `debug` and recoverable stream errors at `warn`. Per-pulse
//! logging is hot, so production deployments normally run at `info` with
//! JSON output and turn individual modules up through the filter:
//!
//! ```yaml
//! logging:
//!   level: info
//!   format: json
//!   filter: "darn_usrp::driver=debug"
//! ```
//!
//! ```rust,ignore
//! use darn_core::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default());
//! tracing::info!(tx_rate = 5.0e6, "device configured");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Multi-line, human-readable
    Pretty,
    /// One line per event
    #[default]
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level when neither `filter` nor `RUST_LOG` is set
    pub level: LogLevel,
    /// Output format
    pub format: LogFormat,
    /// Directive string, e.g. `"darn_usrp=debug"`; overrides `RUST_LOG`
    pub filter: Option<String>,
    /// Include file:line of the event
    pub source_location: bool,
    /// Include thread names (the TX/RX workers are named)
    pub thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            filter: None,
            source_location: false,
            thread_names: true,
        }
    }
}

impl LogConfig {
    /// Verbose configuration for bench work against a simulated device.
    pub fn development() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            source_location: true,
            ..Default::default()
        }
    }

    /// JSON at `info` for the radar site.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Build the level filter for this configuration.
    pub fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        match &self.filter {
            Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Initialize the global logging subscriber.
///
/// Only the first call installs a subscriber; later calls are ignored so
/// tests and embedding processes can call this freely.
pub fn init_logging(config: &LogConfig) {
    let layer = fmt::layer()
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_thread_names(config.thread_names);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(layer)
        .with(config.env_filter());

    // Already installed by an earlier call
    let _ = tracing::subscriber::set_global_default(subscriber);
}
