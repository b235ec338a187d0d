//! Subscription Records
//!
//! Reference-counted bookkeeping for shared wire requests.
//!
//! # Design
//!
//! The table tracks:
//! - One record per open wire request, owning the request id and the
//!   [`UpdateEngine`] for that request
//! - The subscribers attached to each record, keyed by [`SubscriberId`]
//! - Which record currently serves each distinct [`RequestSignature`]
//!
//! Many subscribers can share a record while only one wire request is open.
//! A record that has completed or failed is retired: it stays until its
//! subscribers leave, but new subscribers for the same signature get a fresh
//! record instead of joining it.
//!
//! The table itself is not synchronized and knows nothing about the wire;
//! the registry service wraps it in a lock and turns the outcomes returned
//! here into open and cancel calls.
//!
//! `S` is the subscriber sink type (a channel sender in production).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::error_event::RequestId;
use crate::domain::signature::{RequestKind, RequestSignature};
use crate::domain::snapshot::UpdateEngine;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for an attached subscriber.
pub type SubscriberId = u64;

/// Proof of attachment returned to a subscriber.
///
/// Detaching with the same handle twice is a no-op the second time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberHandle {
    id: SubscriberId,
    request_id: RequestId,
    signature: Arc<RequestSignature>,
}

impl SubscriberHandle {
    /// Get the subscriber id.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Get the wire request id of the record this handle is attached to.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Get the signature of the record this handle is attached to.
    #[must_use]
    pub fn signature(&self) -> &RequestSignature {
        &self.signature
    }
}

impl fmt::Display for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber#{} on {}", self.id, self.signature)
    }
}

/// Result of removing a subscriber from its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    /// The handle was not (or no longer) attached.
    NotAttached,
    /// The subscriber left; the record stays with this many subscribers.
    Remaining(usize),
    /// The last subscriber left and the record was removed.
    TornDown {
        /// Wire request that must now be cancelled.
        request_id: RequestId,
        /// Kind of the wire request.
        kind: RequestKind,
    },
}

// =============================================================================
// Subscription Record
// =============================================================================

/// Shared state behind one wire request.
#[derive(Debug)]
pub struct SubscriptionRecord<S> {
    signature: Arc<RequestSignature>,
    request_id: RequestId,
    engine: UpdateEngine,
    subscribers: HashMap<SubscriberId, S>,
    retired: bool,
}

impl<S> SubscriptionRecord<S> {
    fn new(signature: Arc<RequestSignature>, request_id: RequestId) -> Self {
        Self {
            signature,
            request_id,
            engine: UpdateEngine::new(),
            subscribers: HashMap::new(),
            retired: false,
        }
    }

    /// Get the signature.
    #[must_use]
    pub fn signature(&self) -> &RequestSignature {
        &self.signature
    }

    /// Get the wire request id.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn refcount(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if the record no longer accepts new subscribers.
    #[must_use]
    pub const fn is_retired(&self) -> bool {
        self.retired
    }

    /// Get the update engine.
    #[must_use]
    pub const fn engine(&self) -> &UpdateEngine {
        &self.engine
    }

    /// Get the update engine mutably.
    pub fn engine_mut(&mut self) -> &mut UpdateEngine {
        &mut self.engine
    }

    /// Iterate over subscriber sinks.
    pub fn sinks(&self) -> impl Iterator<Item = (SubscriberId, &S)> {
        self.subscribers.iter().map(|(id, sink)| (*id, sink))
    }

    /// Split into the engine and the sinks so both can be used at once.
    pub fn parts_mut(&mut self) -> (&mut UpdateEngine, &HashMap<SubscriberId, S>) {
        (&mut self.engine, &self.subscribers)
    }
}

// =============================================================================
// Subscription Table
// =============================================================================

/// Statistics for the subscription table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of records (open wire requests, retired ones included).
    pub record_count: usize,
    /// Number of attached subscribers across all records.
    pub subscriber_count: usize,
}

/// All live subscription records.
///
/// # Example
///
/// ```rust
/// use gateway_stream_mux::domain::signature::{RequestKind, RequestParams, RequestSignature};
/// use gateway_stream_mux::domain::subscription::{DetachOutcome, SubscriptionTable};
///
/// let mut table: SubscriptionTable<()> = SubscriptionTable::new();
/// let signature = RequestSignature::new(RequestKind::OpenOrders, RequestParams::account_wide());
///
/// // First subscriber: no record yet, caller opens the wire request
/// assert!(table.join(&signature, ()).is_err());
/// let first = table.create(signature.clone(), 7, ());
///
/// // Second subscriber shares the record
/// let second = table.join(&signature, ()).unwrap();
///
/// assert_eq!(table.leave(&first), DetachOutcome::Remaining(1));
/// assert_eq!(
///     table.leave(&second),
///     DetachOutcome::TornDown { request_id: 7, kind: RequestKind::OpenOrders }
/// );
/// assert_eq!(table.leave(&second), DetachOutcome::NotAttached);
/// ```
#[derive(Debug)]
pub struct SubscriptionTable<S> {
    records: HashMap<RequestId, SubscriptionRecord<S>>,
    serving: HashMap<Arc<RequestSignature>, RequestId>,
    next_subscriber_id: SubscriberId,
    subscriber_count: usize,
}

impl<S> Default for SubscriptionTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SubscriptionTable<S> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            serving: HashMap::new(),
            next_subscriber_id: 1,
            subscriber_count: 0,
        }
    }

    /// Get the record currently serving a signature.
    ///
    /// Retired records are not returned.
    #[must_use]
    pub fn get(&self, signature: &RequestSignature) -> Option<&SubscriptionRecord<S>> {
        let request_id = self.serving.get(signature)?;
        self.records.get(request_id)
    }

    /// Get the record owning a wire request id.
    #[must_use]
    pub fn record_for_request(&self, request_id: RequestId) -> Option<&SubscriptionRecord<S>> {
        self.records.get(&request_id)
    }

    /// Get the record owning a wire request id, mutably.
    pub fn record_for_request_mut(
        &mut self,
        request_id: RequestId,
    ) -> Option<&mut SubscriptionRecord<S>> {
        self.records.get_mut(&request_id)
    }

    /// Attach a subscriber to the record serving a signature.
    ///
    /// # Errors
    ///
    /// Gives the sink back when no record serves the signature; the caller
    /// must open a wire request and call [`Self::create`].
    pub fn join(&mut self, signature: &RequestSignature, sink: S) -> Result<SubscriberHandle, S> {
        let Some(record) = self
            .serving
            .get(signature)
            .and_then(|request_id| self.records.get_mut(request_id))
        else {
            return Err(sink);
        };

        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        record.subscribers.insert(id, sink);
        self.subscriber_count += 1;

        Ok(SubscriberHandle {
            id,
            request_id: record.request_id,
            signature: Arc::clone(&record.signature),
        })
    }

    /// Create a record for a freshly opened wire request with its first
    /// subscriber.
    ///
    /// A record already serving the signature is retired, not removed.
    pub fn create(
        &mut self,
        signature: RequestSignature,
        request_id: RequestId,
        sink: S,
    ) -> SubscriberHandle {
        let signature = Arc::new(signature);
        let mut record = SubscriptionRecord::new(Arc::clone(&signature), request_id);

        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        record.subscribers.insert(id, sink);
        self.subscriber_count += 1;

        if let Some(previous) = self.serving.insert(Arc::clone(&signature), request_id)
            && let Some(superseded) = self.records.get_mut(&previous)
        {
            superseded.retired = true;
        }
        self.records.insert(request_id, record);

        SubscriberHandle {
            id,
            request_id,
            signature,
        }
    }

    /// Stop routing new subscribers to the record owning `request_id`.
    ///
    /// Returns the number of subscribers still attached, or `None` if no
    /// record owns the id or it was already retired.
    pub fn retire(&mut self, request_id: RequestId) -> Option<usize> {
        let record = self.records.get_mut(&request_id)?;
        if record.retired {
            return None;
        }
        record.retired = true;

        if self.serving.get(&record.signature) == Some(&request_id) {
            self.serving.remove(&record.signature);
        }
        Some(record.subscribers.len())
    }

    /// Remove a subscriber.
    ///
    /// Removes the record when its last subscriber leaves.
    pub fn leave(&mut self, handle: &SubscriberHandle) -> DetachOutcome {
        let Some(record) = self.records.get_mut(&handle.request_id) else {
            return DetachOutcome::NotAttached;
        };

        if record.subscribers.remove(&handle.id).is_none() {
            return DetachOutcome::NotAttached;
        }
        self.subscriber_count -= 1;

        let remaining = record.subscribers.len();
        if remaining > 0 {
            return DetachOutcome::Remaining(remaining);
        }

        let kind = record.signature.kind();
        if let Some(record) = self.records.remove(&handle.request_id)
            && self.serving.get(&record.signature) == Some(&handle.request_id)
        {
            self.serving.remove(&record.signature);
        }

        DetachOutcome::TornDown {
            request_id: handle.request_id,
            kind,
        }
    }

    /// Get statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            record_count: self.records.len(),
            subscriber_count: self.subscriber_count,
        }
    }

    /// Get the signatures currently served by a record.
    #[must_use]
    pub fn signatures(&self) -> Vec<RequestSignature> {
        self.serving.keys().map(|s| RequestSignature::clone(s)).collect()
    }

    /// Check if the table holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
