// Telemetry initialization
//
// Console logging through tracing-subscriber with an EnvFilter. The bot has
// no trace exporter; operators read structured log lines and the botstats
// counters.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name, logged once at startup
    pub service_name: String,
    /// Log filter (e.g., "info", "huntbot=debug")
    pub log_filter: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Include the event target (module path) in each line
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "huntbot".to_string(),
            log_filter: None,
            json: false,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `HUNTBOT_SERVICE_NAME`: Service name (default: "huntbot")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `LOG_FORMAT`: "json" for JSON lines
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("HUNTBOT_SERVICE_NAME")
                .unwrap_or_else(|_| "huntbot".to_string()),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            with_target: true,
        }
    }

    /// The filter directive that will be installed.
    pub fn filter_directive(&self) -> String {
        self.log_filter
            .clone()
            .unwrap_or_else(|| "huntbot=info,huntbot_engine=info,huntbot_core=info".to_string())
    }
}

/// Install the global tracing subscriber.
///
/// Call once, early in `main`. An unparseable filter falls back to "info".
pub fn init_telemetry(config: &TelemetryConfig) {
    let filter = EnvFilter::try_new(config.filter_directive()).unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry().with(console_layer).init();

    tracing::debug!(service = %config.service_name, "Telemetry initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_directive() {
        let config = TelemetryConfig::default();
        assert!(config.filter_directive().contains("huntbot=info"));
    }

    #[test]
    fn test_explicit_filter_wins() {
        let config = TelemetryConfig {
            log_filter: Some("debug".to_string()),
            ..Default::default()
        };
        assert_eq!(config.filter_directive(), "debug");
    }
}
