//! Telemetry: structured logging and metrics.
//!
//! - **Logging**: Structured JSON/pretty logging through `tracing-subscriber`
//! - **Metrics**: Counters and gauges through the `metrics` facade
//!
//! # Example
//!
//! ```rust,no_run
//! use gavel_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! let config = TelemetryConfig::default();
//! init_telemetry(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use self::logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};
pub use self::metrics::describe_metrics;

use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name reported at startup
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "gavel".to_string()
}

fn default_environment() -> String {
    std::env::var("GAVEL_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize logging and register metric descriptions.
///
/// Call once at process startup.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    init_logging(&config.logging, &config.environment)?;
    describe_metrics();

    ::tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        version = env!("CARGO_PKG_VERSION"),
        "Telemetry initialized"
    );

    Ok(())
}
