//! Global Error Channel
//!
//! Process-wide fan-out of gateway errors over a tokio broadcast channel.
//!
//! # Architecture
//!
//! The registry publishes through the [`ErrorSink`] port:
//! - connection-level errors (request id `-1`)
//! - warnings tied to a request
//! - fatal request errors, after they reached the record's subscribers
//!
//! Observers subscribe independently of any subscription. A slow observer
//! lags and skips the oldest errors rather than holding up the registry.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::ports::ErrorSink;
use crate::domain::error_event::ErrorEvent;
use crate::infrastructure::config::BroadcastSettings;

/// Configuration for the error channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorHubConfig {
    /// Number of errors buffered per observer before it lags.
    pub capacity: usize,
}

impl Default for ErrorHubConfig {
    fn default() -> Self {
        Self { capacity: 1_024 }
    }
}

impl From<BroadcastSettings> for ErrorHubConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            capacity: settings.error_channel_capacity,
        }
    }
}

/// Broadcast hub for gateway errors.
///
/// # Example
///
/// ```rust
/// use gateway_stream_mux::domain::error_event::ErrorEvent;
/// use gateway_stream_mux::infrastructure::broadcast::ErrorHub;
///
/// let hub = ErrorHub::with_defaults();
/// let mut rx = hub.subscribe();
///
/// assert_eq!(hub.publish(ErrorEvent::connection(1100, "Connectivity lost")), Some(1));
/// assert_eq!(rx.try_recv().unwrap().code, 1100);
/// ```
#[derive(Debug)]
pub struct ErrorHub {
    tx: broadcast::Sender<ErrorEvent>,
}

impl ErrorHub {
    /// Create a new error hub with the given configuration.
    #[must_use]
    pub fn new(config: ErrorHubConfig) -> Self {
        Self {
            tx: broadcast::channel(config.capacity.max(1)).0,
        }
    }

    /// Create a new error hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ErrorHubConfig::default())
    }

    /// Send an error to all observers.
    ///
    /// Returns the number of observers that received it, or `None` if there
    /// are no active observers.
    #[must_use]
    pub fn publish(&self, event: ErrorEvent) -> Option<usize> {
        self.tx.send(event).ok()
    }

    /// Get a new receiver for errors.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ErrorEvent> {
        self.tx.subscribe()
    }

    /// Get the number of active observers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ErrorSink for ErrorHub {
    fn publish(&self, event: ErrorEvent) {
        let _ = Self::publish(self, event);
    }
}

/// Shared error hub reference.
pub type SharedErrorHub = Arc<ErrorHub>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_count_tracks_observers() {
        let hub = ErrorHub::with_defaults();
        assert_eq!(hub.receiver_count(), 0);

        {
            let _rx1 = hub.subscribe();
            let _rx2 = hub.subscribe();
            assert_eq!(hub.receiver_count(), 2);
        }

        assert_eq!(hub.receiver_count(), 0);
    }

    #[tokio::test]
    async fn every_observer_gets_each_error() {
        let hub = ErrorHub::with_defaults();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        let _ = hub.publish(ErrorEvent::new(3, 200, "No security definition"));

        assert_eq!(rx1.recv().await.unwrap().request_id, 3);
        assert_eq!(rx2.recv().await.unwrap().request_id, 3);
    }

    #[test]
    fn publish_with_no_observers_returns_none() {
        let hub = ErrorHub::with_defaults();
        assert!(hub.publish(ErrorEvent::connection(1100, "lost")).is_none());
    }

    #[test]
    fn sink_port_ignores_missing_observers() {
        let hub: Arc<dyn ErrorSink> = Arc::new(ErrorHub::with_defaults());
        hub.publish(ErrorEvent::connection(1100, "lost"));
    }

    #[tokio::test]
    async fn slow_observer_lags() {
        let hub = ErrorHub::new(ErrorHubConfig { capacity: 2 });
        let mut rx = hub.subscribe();

        for code in 0..4 {
            let _ = hub.publish(ErrorEvent::new(1, code, "x"));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert_eq!(rx.recv().await.unwrap().code, 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let hub = ErrorHub::new(ErrorHubConfig { capacity: 0 });
        let _rx = hub.subscribe();
        assert_eq!(hub.publish(ErrorEvent::connection(1, "x")), Some(1));
    }
}
