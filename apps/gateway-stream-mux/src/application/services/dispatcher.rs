//! Serialized Event Dispatch
//!
//! The gateway connection pushes callbacks from its own I/O task. They are
//! queued on a bounded channel and applied to the registry by a single
//! [`Dispatcher`] task, one at a time and in arrival order, which gives the
//! per-request ordering guarantee without the wire side ever touching the
//! registry lock.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::registry::SubscriptionRegistry;
use crate::application::ports::WireEvent;
use crate::infrastructure::metrics::{self, DropReason};

/// Create the wire event queue.
#[must_use]
pub fn wire_channel(capacity: usize) -> (WireEventSender, mpsc::Receiver<WireEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (WireEventSender { tx }, rx)
}

/// Producer side of the wire event queue, held by the wire adapter.
#[derive(Debug, Clone)]
pub struct WireEventSender {
    tx: mpsc::Sender<WireEvent>,
}

impl WireEventSender {
    /// Queue an event from a synchronous callback.
    ///
    /// A full queue drops the event. Returns `false` once the dispatcher is
    /// gone.
    pub fn emit(&self, event: WireEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    request_id = event.request_id(),
                    "Wire event queue full, dropping event"
                );
                metrics::record_event_dropped(DropReason::ChannelFull);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue an event, waiting for room.
    ///
    /// Returns `false` once the dispatcher is gone.
    pub async fn send(&self, event: WireEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Check if the dispatcher has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Applies queued wire events to the registry.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use gateway_stream_mux::application::services::dispatcher::{Dispatcher, wire_channel};
/// use gateway_stream_mux::application::services::registry::SubscriptionRegistry;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example(registry: Arc<SubscriptionRegistry>) {
///     let (sender, events) = wire_channel(4096);
///     let shutdown = CancellationToken::new();
///
///     let handle = Dispatcher::new(registry, events, shutdown.clone()).spawn();
///
///     // hand `sender` to the wire adapter ...
///     # drop(sender);
///
///     shutdown.cancel();
///     let _ = handle.await;
/// }
/// ```
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    events: mpsc::Receiver<WireEvent>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub const fn new(
        registry: Arc<SubscriptionRegistry>,
        events: mpsc::Receiver<WireEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            events,
            shutdown,
        }
    }

    /// Run until shutdown is requested or every sender is dropped.
    ///
    /// Returns the number of events applied.
    pub async fn run(mut self) -> u64 {
        let mut applied = 0_u64;

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    debug!(applied, "Dispatcher cancelled");
                    break;
                }
                event = self.events.recv() => {
                    let Some(event) = event else {
                        debug!(applied, "Wire event queue closed");
                        break;
                    };
                    self.registry.handle_wire_event(event);
                    applied += 1;
                }
            }
        }

        applied
    }

    /// Spawn [`Self::run`] on the current runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }
}

// =============================================================================
// Tests
// =============================================================================
