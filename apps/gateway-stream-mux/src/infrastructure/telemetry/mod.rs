//! Log and Trace Pipeline
//!
//! Builds the global `tracing` subscriber from up to three layers:
//! - an `EnvFilter` seeded with the base directive, extended by `RUST_LOG`
//! - a fmt layer on stderr, since stdout carries the demo output
//! - an OTLP span exporter bridged by `tracing-opentelemetry`, only when
//!   span export is on
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: extra filter directives
//! - `MUX_LOG_DIRECTIVE`: base filter directive (default: gateway_stream_mux=info)
//! - `OTEL_ENABLED`: "false", "0", "no" or "off" turns span export off (default: on)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: service name on exported spans (default: gateway-stream-mux)
//!
//! # Usage
//!
//! ```ignore
//! use gateway_stream_mux::infrastructure::telemetry;
//!
//! // Spans still buffered are flushed when the guard drops
//! let _guard = telemetry::init()?;
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

const SERVICE_NAME: &str = "gateway-stream-mux";
const OTLP_ENDPOINT: &str = "http://localhost:4317";
const BASE_DIRECTIVE: &str = "gateway_stream_mux=info";

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The base filter directive does not parse.
    #[error("invalid log directive '{directive}': {source}")]
    Directive {
        /// Offending directive.
        directive: String,
        /// Parser error.
        #[source]
        source: ParseError,
    },

    /// The OTLP exporter could not be built.
    #[error("failed to build OTLP span exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Keeps the span exporter alive. Dropping it flushes and shuts it down.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Check if spans are exported.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Span exporter shutdown failed: {e}");
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directive applied before `RUST_LOG`.
    pub base_directive: String,
    /// Whether spans go to the OTLP exporter.
    pub export_spans: bool,
    /// OTLP gRPC endpoint.
    pub otlp_endpoint: String,
    /// Service name on exported spans.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            base_directive: BASE_DIRECTIVE.to_string(),
            export_spans: true,
            otlp_endpoint: OTLP_ENDPOINT.to_string(),
            service_name: SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read settings from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings from an arbitrary key lookup. Blank values fall back to
    /// the defaults.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Self {
            base_directive: text("MUX_LOG_DIRECTIVE").unwrap_or(defaults.base_directive),
            export_spans: text("OTEL_ENABLED").is_none_or(|v| {
                !matches!(v.to_lowercase().as_str(), "false" | "0" | "no" | "off")
            }),
            otlp_endpoint: text("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            service_name: text("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }

    fn filter(&self) -> Result<EnvFilter, TelemetryError> {
        let directive: Directive =
            self.base_directive
                .parse()
                .map_err(|source| TelemetryError::Directive {
                    directive: self.base_directive.clone(),
                    source,
                })?;
        Ok(EnvFilter::from_default_env().add_directive(directive))
    }

    fn tracer_provider(&self) -> Result<Option<SdkTracerProvider>, TelemetryError> {
        if !self.export_spans {
            return Ok(None);
        }

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.otlp_endpoint)
            .build()?;
        let resource = Resource::builder()
            .with_service_name(self.service_name.clone())
            .build();

        Ok(Some(
            SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(resource)
                .build(),
        ))
    }
}

/// Install the subscriber with settings from the environment.
///
/// # Errors
///
/// See [`init_with_config`].
pub fn init() -> Result<TelemetryGuard, TelemetryError> {
    init_with_config(&TelemetryConfig::from_env())
}

/// Install the subscriber with explicit settings.
///
/// Keep the returned guard alive until exit.
///
/// # Errors
///
/// Returns an error if the base directive is invalid, the exporter cannot be
/// built, or a subscriber is already installed.
pub fn init_with_config(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = config.filter()?;
    let provider = config.tracer_provider()?;

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    let spans = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(spans)
        .try_init()?;

    Ok(TelemetryGuard { provider })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_lookup_gives_defaults() {
        let config = TelemetryConfig::from_lookup(lookup(&[]));

        assert_eq!(config, TelemetryConfig::default());
        assert!(config.export_spans);
        assert_eq!(config.base_directive, "gateway_stream_mux=info");
        assert_eq!(config.otlp_endpoint, "http://localhost:4317");
    }

    #[test_case("false", false ; "false")]
    #[test_case(" OFF ", false ; "off padded")]
    #[test_case("0", false ; "zero")]
    #[test_case("true", true ; "true")]
    #[test_case("", true ; "blank")]
    fn otel_enabled_switch(raw: &str, expected: bool) {
        let config = TelemetryConfig::from_lookup(lookup(&[("OTEL_ENABLED", raw)]));
        assert_eq!(config.export_spans, expected);
    }

    #[test]
    fn overrides_are_trimmed() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("MUX_LOG_DIRECTIVE", " gateway_stream_mux=debug "),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
            ("OTEL_SERVICE_NAME", "mux-canary"),
        ]));

        assert_eq!(config.base_directive, "gateway_stream_mux=debug");
        assert_eq!(config.otlp_endpoint, "http://collector:4317");
        assert_eq!(config.service_name, "mux-canary");
    }

    #[test]
    fn invalid_directive_is_reported() {
        let config = TelemetryConfig {
            base_directive: "gateway_stream_mux=loud".to_string(),
            ..TelemetryConfig::default()
        };

        let err = config.filter().unwrap_err();
        assert!(matches!(err, TelemetryError::Directive { ref directive, .. } if directive == "gateway_stream_mux=loud"));
    }

    #[test]
    fn default_directive_builds_filter() {
        assert!(TelemetryConfig::default().filter().is_ok());
    }

    #[test]
    fn no_provider_when_export_is_off() {
        let config = TelemetryConfig {
            export_spans: false,
            ..TelemetryConfig::default()
        };

        assert!(config.tracer_provider().unwrap().is_none());
    }
}
