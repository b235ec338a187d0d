//! Reactive Subscription Streams
//!
//! Caller-facing entry points over the registry. Each subscription is an
//! [`UpdateStream`] yielding `Result<UpdateDiff, ErrorEvent>`, and the
//! process-wide error channel is an [`ErrorStream`].
//!
//! # Lifecycle
//!
//! - [`StreamMux::subscribe`] attaches to the registry
//! - diffs arrive as `Ok(diff)` in wire order
//! - a fatal request error arrives as one `Err(event)`, then the stream ends
//! - gateway completion ends the stream without an error
//! - [`CancelHandle::cancel`] ends the stream from anywhere
//!
//! [`StreamMux::snapshot`] and [`StreamMux::all_open_orders`] fold one
//! subscription into its final field map and resolve on completion.
//!
//! The registry handle is released exactly once, on whichever of these
//! happens first, or when the stream is dropped.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::application::services::registry::{
    SubscribeError, SubscriberEvent, SubscriptionRegistry,
};
use crate::domain::error_event::ErrorEvent;
use crate::domain::field::{FieldId, FieldValue};
use crate::domain::signature::{ContractKey, RequestKind, RequestParams, RequestSignature};
use crate::domain::snapshot::UpdateDiff;
use crate::domain::subscription::SubscriberHandle;
use crate::infrastructure::broadcast::SharedErrorHub;

// =============================================================================
// Errors
// =============================================================================

/// Errors from a one-shot snapshot request.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The request could not be opened.
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    /// The gateway failed the request.
    #[error("snapshot request failed: {0}")]
    Request(ErrorEvent),

    /// The subscription ended before the gateway completed it.
    #[error("snapshot ended before completion")]
    Closed,
}

// =============================================================================
// Stream Mux
// =============================================================================

/// Public subscription entry points.
#[derive(Debug, Clone)]
pub struct StreamMux {
    registry: Arc<SubscriptionRegistry>,
    errors: SharedErrorHub,
}

impl StreamMux {
    /// Create a mux over a registry and the error hub it publishes to.
    #[must_use]
    pub const fn new(registry: Arc<SubscriptionRegistry>, errors: SharedErrorHub) -> Self {
        Self { registry, errors }
    }

    /// Subscribe to a request.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError`] when the request cannot be opened.
    pub fn subscribe(
        &self,
        kind: RequestKind,
        params: RequestParams,
    ) -> Result<UpdateStream, SubscribeError> {
        let attachment = self.registry.attach(RequestSignature::new(kind, params))?;

        Ok(UpdateStream {
            events: attachment.events,
            release: CancelHandle(Arc::new(Release {
                registry: Arc::clone(&self.registry),
                handle: Mutex::new(Some(attachment.handle)),
            })),
            finished: false,
            completed: false,
        })
    }

    /// Request a one-shot snapshot and wait for the gateway to complete it.
    ///
    /// Folds every diff into one field map. Joins an identical request if one
    /// is already live, in which case its current state is the starting point.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Request`] if the gateway fails the request,
    /// and [`SnapshotError::Closed`] if the stream ends without completion.
    pub async fn snapshot(
        &self,
        kind: RequestKind,
        params: RequestParams,
    ) -> Result<HashMap<FieldId, FieldValue>, SnapshotError> {
        let mut stream = self.subscribe(kind, params)?;
        let mut fields = HashMap::new();

        while let Some(item) = stream.next().await {
            let diff = item.map_err(SnapshotError::Request)?;
            fields.extend(diff.added);
            fields.extend(diff.changed);
        }

        if stream.is_completed() {
            Ok(fields)
        } else {
            Err(SnapshotError::Closed)
        }
    }

    /// Subscribe to market data for a contract.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError`] when the request cannot be opened.
    pub fn market_data(
        &self,
        contract: ContractKey,
        generic_fields: impl IntoIterator<Item = u16>,
        snapshot: bool,
        regulatory_snapshot: bool,
    ) -> Result<UpdateStream, SubscribeError> {
        let params = RequestParams::for_contract(contract)
            .with_generic_fields(generic_fields)
            .with_snapshot(snapshot)
            .with_regulatory_snapshot(regulatory_snapshot);
        self.subscribe(RequestKind::MarketData, params)
    }

    /// Subscribe to the account's open orders.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError`] when the request cannot be opened.
    pub fn open_orders(&self) -> Result<UpdateStream, SubscribeError> {
        self.subscribe(RequestKind::OpenOrders, RequestParams::account_wide())
    }

    /// Fetch every open order of the account once.
    ///
    /// # Errors
    ///
    /// See [`StreamMux::snapshot`].
    pub async fn all_open_orders(&self) -> Result<HashMap<FieldId, FieldValue>, SnapshotError> {
        self.snapshot(RequestKind::OpenOrders, RequestParams::account_wide())
            .await
    }

    /// Observe every error published on the global channel from now on.
    #[must_use]
    pub fn errors(&self) -> ErrorStream {
        ErrorStream {
            inner: BroadcastStream::new(self.errors.subscribe()),
        }
    }

    /// Get the underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }
}

// =============================================================================
// Cancel Handle
// =============================================================================

struct Release {
    registry: Arc<SubscriptionRegistry>,
    handle: Mutex<Option<SubscriberHandle>>,
}

impl Release {
    fn release(&self) -> bool {
        let Some(handle) = self.handle.lock().take() else {
            return false;
        };
        debug!(subscriber = handle.id(), signature = %handle.signature(), "Releasing subscription");
        self.registry.detach(&handle)
    }

    fn is_released(&self) -> bool {
        self.handle.lock().is_none()
    }
}

/// Cancellation capability for one [`UpdateStream`].
///
/// Clones share the same subscription. The first `cancel` detaches; later
/// ones do nothing.
#[derive(Clone)]
pub struct CancelHandle(Arc<Release>);

impl CancelHandle {
    /// Detach the subscription. Returns `true` only for the call that
    /// actually detached.
    #[allow(clippy::must_use_candidate)]
    pub fn cancel(&self) -> bool {
        self.0.release()
    }

    /// Check if the subscription has been released.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.is_released()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Update Stream
// =============================================================================

/// Stream of diffs for one subscription.
///
/// Dropping the stream releases the subscription.
///
/// # Example
///
/// ```ignore
/// let mut stream = mux.market_data(contract, [], false, false)?;
///
/// while let Some(item) = stream.next().await {
///     match item {
///         Ok(diff) => println!("{} fields", diff.len()),
///         Err(error) => eprintln!("{error}"),
///     }
/// }
/// ```
#[derive(Debug)]
pub struct UpdateStream {
    events: mpsc::UnboundedReceiver<SubscriberEvent>,
    release: CancelHandle,
    finished: bool,
    completed: bool,
}

impl UpdateStream {
    /// Get a cancellation handle usable from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.release.clone()
    }

    /// Detach now. The stream yields `None` afterwards.
    #[allow(clippy::must_use_candidate)]
    pub fn cancel(&self) -> bool {
        self.release.cancel()
    }

    /// Check if the stream has ended or been cancelled.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.finished || self.release.is_cancelled()
    }

    /// Check if the gateway completed the request.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    fn finish(&mut self) {
        self.finished = true;
        self.release.cancel();
    }
}

impl Stream for UpdateStream {
    type Item = Result<UpdateDiff, ErrorEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_terminated() {
            self.finished = true;
            return Poll::Ready(None);
        }

        match ready!(self.events.poll_recv(cx)) {
            Some(SubscriberEvent::Update(diff)) => Poll::Ready(Some(Ok(diff))),
            Some(SubscriberEvent::Failed(error)) => {
                self.finish();
                Poll::Ready(Some(Err(error)))
            }
            Some(SubscriberEvent::Completed) => {
                self.completed = true;
                self.finish();
                Poll::Ready(None)
            }
            None => {
                self.finish();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        self.release.cancel();
    }
}

// =============================================================================
// Error Stream
// =============================================================================

/// Stream over the global error channel.
///
/// Errors missed while the observer lagged are skipped with a warning.
#[derive(Debug)]
pub struct ErrorStream {
    inner: BroadcastStream<ErrorEvent>,
}

impl Stream for ErrorStream {
    type Item = ErrorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(event)) => return Poll::Ready(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "Error observer lagged, skipping errors");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
