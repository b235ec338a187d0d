#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Gateway Stream Mux - Subscription Multiplexer
//!
//! Client-side plumbing for a callback-driven trading gateway connection.
//! Any number of local subscribers can ask for the same logical request
//! (market data for a contract, open orders, ...) while the gateway sees
//! exactly one wire request. Repeated field snapshots from the gateway are
//! turned into `{added, changed}` diffs, and errors are routed to the
//! subscribers of the request they belong to and to one global channel.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure data and bookkeeping
//!   - `field`: Field identifiers and values
//!   - `signature`: Canonical request identity
//!   - `snapshot`: Incremental update engine
//!   - `subscription`: Refcounted subscription table
//!   - `error_event`: Error events and severity policy
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Wire adapter and error sink interfaces
//!   - `services`: Subscription registry and wire event dispatcher
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: Caller-facing update and error streams
//!   - `broadcast`: Global error channel
//!   - `simulator`: Simulated gateway for the demo and tests
//!   - `config`, `metrics`, `telemetry`: Ambient stack
//!
//! # Data Flow
//!
//! ```text
//!                 open/cancel (one per signature)
//!   Registry  ─────────────────────────────────────►  Gateway
//!      ▲                                                 │
//!      │ dispatch                        fields / errors │
//!   Dispatcher ◄──────────── wire event queue ◄──────────┘
//!      │
//!      ├──► UpdateStream 1   (Ok(diff) | Err(error))
//!      ├──► UpdateStream 2
//!      └──► ErrorStream      (every error, once)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Request identity, diffs and subscription bookkeeping.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::error_event::{ErrorEvent, ErrorPolicy, ErrorSeverity, RequestId};
pub use domain::field::{FieldId, FieldNamespace, FieldValue};
pub use domain::signature::{ContractKey, RequestKind, RequestParams, RequestSignature};
pub use domain::snapshot::{FieldEvent, UpdateDiff, UpdateEngine};
pub use domain::subscription::{SubscriberHandle, SubscriptionStats};

// Ports and services
pub use application::ports::{ErrorSink, WireAdapter, WireError, WireEvent};
pub use application::services::dispatcher::{Dispatcher, WireEventSender, wire_channel};
pub use application::services::registry::{
    RegistryOptions, SubscribeError, SubscriberEvent, SubscriptionRegistry,
};

// Streams
pub use infrastructure::stream::{
    CancelHandle, ErrorStream, SnapshotError, StreamMux, UpdateStream,
};

// Error channel
pub use infrastructure::broadcast::{ErrorHub, ErrorHubConfig, SharedErrorHub};

// Infrastructure config
pub use infrastructure::config::{ConfigError, MuxConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
