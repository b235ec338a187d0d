//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the caller-facing
//! stream API and the ambient stack (config, logging, metrics).

/// Global error channel.
pub mod broadcast;

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// In-process simulated gateway.
pub mod simulator;

/// Reactive subscription streams.
pub mod stream;

/// OpenTelemetry tracing integration.
pub mod telemetry;
