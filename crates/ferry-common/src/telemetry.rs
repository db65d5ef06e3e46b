//! Tracing subscriber initialization
//!
//! Structured logging for migrations: JSON lines when running in a cluster,
//! human-readable output otherwise. Log levels come from `RUST_LOG` when set.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,ferry=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of plain text
    pub json: bool,
    /// Filter directives used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: std::env::var_os("KUBERNETES_SERVICE_HOST").is_some(),
            default_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber has already been set.
pub fn init_tracing(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let (json_layer, plain_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true);
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(plain_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_default_filter() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn second_init_fails() {
        let config = TelemetryConfig {
            json: true,
            default_filter: "warn".to_string(),
        };
        // Another test in this binary may already have installed a subscriber,
        // so only the second call is guaranteed to fail.
        let _ = init_tracing(config.clone());
        let err = init_tracing(config).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("failed to initialize tracing subscriber"));
    }
}
