//! Prometheus Metrics Module
//!
//! Records registry activity in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Wire requests**: opens and cancels by request kind
//! - **Delivery**: diffs delivered, events dropped by reason
//! - **Errors**: errors routed, by scope
//! - **Registry**: live records and attached subscribers
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder, so
//! tests and library users that never call it pay nothing.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::signature::RequestKind;
use crate::domain::subscription::SubscriptionStats;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "gateway_mux_wire_requests_opened_total",
        "Wire requests opened, by request kind"
    );
    describe_counter!(
        "gateway_mux_wire_requests_cancelled_total",
        "Wire requests cancelled after the last subscriber left, by request kind"
    );
    describe_counter!(
        "gateway_mux_diffs_delivered_total",
        "Non-empty update diffs delivered to subscribers"
    );
    describe_counter!(
        "gateway_mux_events_dropped_total",
        "Wire events dropped, by reason"
    );
    describe_counter!(
        "gateway_mux_errors_total",
        "Gateway errors routed, by scope"
    );

    describe_gauge!(
        "gateway_mux_active_records",
        "Number of live subscription records (open wire requests)"
    );
    describe_gauge!(
        "gateway_mux_attached_subscribers",
        "Number of attached subscribers across all records"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons a wire event is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No record owns the request id (already torn down, or unknown).
    UnknownRequest,
    /// The event produced an empty diff.
    NoChange,
    /// The dispatcher channel was full.
    ChannelFull,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownRequest => "unknown_request",
            Self::NoChange => "no_change",
            Self::ChannelFull => "channel_full",
        }
    }
}

/// Where an error was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Connection-level error (global channel only).
    Connection,
    /// Fatal request error delivered to subscribers.
    Request,
    /// Warning (global channel only).
    Warning,
    /// Error for a request with no live record.
    Orphan,
}

impl ErrorScope {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Request => "request",
            Self::Warning => "warning",
            Self::Orphan => "orphan",
        }
    }
}

/// Record a wire request being opened.
pub fn record_request_opened(kind: RequestKind) {
    counter!(
        "gateway_mux_wire_requests_opened_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a wire request being cancelled.
pub fn record_request_cancelled(kind: RequestKind) {
    counter!(
        "gateway_mux_wire_requests_cancelled_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record diffs delivered to subscribers.
pub fn record_diffs_delivered(count: u64) {
    counter!("gateway_mux_diffs_delivered_total").increment(count);
}

/// Record a dropped wire event.
pub fn record_event_dropped(reason: DropReason) {
    counter!(
        "gateway_mux_events_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a routed error.
pub fn record_error(scope: ErrorScope) {
    counter!(
        "gateway_mux_errors_total",
        "scope" => scope.as_str()
    )
    .increment(1);
}

/// Update the registry gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_registry_stats(stats: SubscriptionStats) {
    gauge!("gateway_mux_active_records").set(stats.record_count as f64);
    gauge!("gateway_mux_attached_subscribers").set(stats.subscriber_count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::UnknownRequest.as_str(), "unknown_request");
        assert_eq!(DropReason::NoChange.as_str(), "no_change");
        assert_eq!(DropReason::ChannelFull.as_str(), "channel_full");
    }

    #[test]
    fn error_scope_as_str() {
        assert_eq!(ErrorScope::Connection.as_str(), "connection");
        assert_eq!(ErrorScope::Request.as_str(), "request");
        assert_eq!(ErrorScope::Warning.as_str(), "warning");
        assert_eq!(ErrorScope::Orphan.as_str(), "orphan");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_request_opened(RequestKind::MarketData);
        record_event_dropped(DropReason::UnknownRequest);
        set_registry_stats(SubscriptionStats::default());
    }
}
