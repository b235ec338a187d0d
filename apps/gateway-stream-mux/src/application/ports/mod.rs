//! Port Interfaces
//!
//! Contracts between the registry and the outside world.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`WireAdapter`]: opens and cancels requests on the gateway connection
//! - [`ErrorSink`]: receives errors that belong on the global error channel
//!
//! ## Driver Ports (Inbound)
//!
//! - [`WireEvent`]: callbacks pushed by the gateway connection, fed to the
//!   dispatcher through a bounded channel

use thiserror::Error;

use crate::domain::error_event::{ErrorEvent, RequestId};
use crate::domain::signature::{RequestKind, RequestSignature};
use crate::domain::snapshot::FieldEvent;

// =============================================================================
// Wire Adapter
// =============================================================================

/// Errors raised by a wire adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The gateway connection is down.
    #[error("gateway connection is not established")]
    NotConnected,

    /// The gateway refused the call.
    #[error("gateway rejected the call: {0}")]
    Rejected(String),
}

/// Gateway connection, seen from the registry.
///
/// Calls are made while the registry lock is held, so implementations must
/// not block and must not call back into the registry synchronously. Events
/// belong on the [`WireEvent`] channel.
pub trait WireAdapter: Send + Sync {
    /// Open a wire request and return its request id.
    ///
    /// # Errors
    ///
    /// [`WireError::NotConnected`] when the connection is down, or
    /// [`WireError::Rejected`] when the request cannot be sent.
    fn open(&self, signature: &RequestSignature) -> Result<RequestId, WireError>;

    /// Cancel an open wire request.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] when the cancel cannot be sent; the registry
    /// logs it and forgets the request either way.
    fn cancel(&self, request_id: RequestId, kind: RequestKind) -> Result<(), WireError>;

    /// Check if the connection is up. Attaching is refused while it is down.
    fn is_connected(&self) -> bool;
}

// =============================================================================
// Error Sink
// =============================================================================

/// Destination for errors on the global channel.
pub trait ErrorSink: Send + Sync {
    /// Publish an error. Must not block.
    fn publish(&self, event: ErrorEvent);
}

// =============================================================================
// Wire Events
// =============================================================================

/// A callback from the gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// Field values for a request.
    Fields {
        /// Owning wire request.
        request_id: RequestId,
        /// Values in arrival order.
        event: FieldEvent,
    },
    /// An error notification.
    Error(ErrorEvent),
    /// The gateway finished a request (snapshot end, list end).
    Completed {
        /// Finished wire request.
        request_id: RequestId,
    },
}

impl WireEvent {
    /// Request id the event belongs to.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        match self {
            Self::Fields { request_id, .. } | Self::Completed { request_id } => *request_id,
            Self::Error(event) => event.request_id,
        }
    }
}
