//! Subscription Registry
//!
//! Shares one wire request per [`RequestSignature`] across any number of
//! subscribers, diffs incoming field events per request and routes gateway
//! errors.
//!
//! # Concurrency
//!
//! All table mutations and all deliveries happen under one mutex. Attach,
//! detach and dispatch never await and never run subscriber code: a
//! subscriber receives [`SubscriberEvent`]s through its own unbounded
//! channel, so a subscriber that detaches while an event is being fanned out
//! simply stops receiving after the current one. Per-request ordering
//! follows the order in which dispatch calls acquire the lock, which the
//! [`Dispatcher`](super::dispatcher::Dispatcher) keeps equal to wire arrival
//! order.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::application::ports::{ErrorSink, WireAdapter, WireError, WireEvent};
use crate::domain::error_event::{ErrorEvent, ErrorPolicy, ErrorSeverity, RequestId};
use crate::domain::signature::RequestSignature;
use crate::domain::snapshot::{FieldEvent, UpdateDiff};
use crate::domain::subscription::{
    DetachOutcome, SubscriberHandle, SubscriptionStats, SubscriptionTable,
};
use crate::infrastructure::metrics::{self, DropReason, ErrorScope};

// =============================================================================
// Errors
// =============================================================================

/// Errors returned when attaching a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    /// No active gateway connection; nothing was opened.
    #[error("cannot subscribe: gateway connection is not established")]
    NotConnected,

    /// The wire adapter refused to open the request.
    #[error("cannot subscribe: {0}")]
    Wire(WireError),
}

impl From<WireError> for SubscribeError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::NotConnected => Self::NotConnected,
            other @ WireError::Rejected(_) => Self::Wire(other),
        }
    }
}

// =============================================================================
// Subscriber Events
// =============================================================================

/// Event delivered to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberEvent {
    /// A non-empty diff.
    Update(UpdateDiff),
    /// A fatal error for the subscribed request.
    Failed(ErrorEvent),
    /// The gateway finished the request.
    Completed,
}

type SubscriberSink = mpsc::UnboundedSender<SubscriberEvent>;

/// A new attachment: the handle to detach with and the event receiver.
#[derive(Debug)]
pub struct Attachment {
    /// Membership token.
    pub handle: SubscriberHandle,
    /// Events for this subscriber.
    pub events: mpsc::UnboundedReceiver<SubscriberEvent>,
}

// =============================================================================
// Registry
// =============================================================================

/// Registry behavior switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Send the current snapshot to late attachers as their first diff.
    pub replay_snapshot: bool,
    /// Warning versus fatal classification of error codes.
    pub error_policy: ErrorPolicy,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            replay_snapshot: true,
            error_policy: ErrorPolicy::default(),
        }
    }
}

/// Reference-counted registry of shared wire requests.
pub struct SubscriptionRegistry {
    wire: Arc<dyn WireAdapter>,
    errors: Arc<dyn ErrorSink>,
    options: RegistryOptions,
    state: Mutex<SubscriptionTable<SubscriberSink>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Create a registry over a wire adapter and a global error sink.
    #[must_use]
    pub fn new(
        wire: Arc<dyn WireAdapter>,
        errors: Arc<dyn ErrorSink>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            wire,
            errors,
            options,
            state: Mutex::new(SubscriptionTable::new()),
        }
    }

    /// Attach a subscriber to the record for `signature`, opening the wire
    /// request if this is the first subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError::NotConnected`] when the connection is down,
    /// whether or not a record already serves the signature, or
    /// [`SubscribeError::Wire`] when the adapter rejects the open. Nothing is
    /// joined or created in either case.
    pub fn attach(&self, signature: RequestSignature) -> Result<Attachment, SubscribeError> {
        let (tx, events) = mpsc::unbounded_channel();
        let mut state = self.state.lock();

        if !self.wire.is_connected() {
            debug!(signature = %signature, "Attach refused while disconnected");
            return Err(SubscribeError::NotConnected);
        }

        if self.options.replay_snapshot
            && let Some(record) = state.get(&signature)
            && !record.engine().is_empty()
        {
            let _ = tx.send(SubscriberEvent::Update(record.engine().replay()));
        }

        let handle = match state.join(&signature, tx) {
            Ok(handle) => {
                debug!(
                    subscriber = handle.id(),
                    signature = %handle.signature(),
                    "Subscriber joined existing request"
                );
                handle
            }
            Err(tx) => {
                let kind = signature.kind();
                let request_id = self.wire.open(&signature).inspect_err(|e| {
                    warn!(signature = %signature, error = %e, "Failed to open wire request");
                })?;
                metrics::record_request_opened(kind);
                info!(request_id, kind = %kind, signature = %signature, "Opened wire request");
                state.create(signature, request_id, tx)
            }
        };

        metrics::set_registry_stats(state.stats());
        Ok(Attachment { handle, events })
    }

    /// Detach a subscriber, cancelling the wire request when it was the last
    /// one.
    ///
    /// Returns `true` if the handle was attached. Detaching twice is a no-op.
    pub fn detach(&self, handle: &SubscriberHandle) -> bool {
        let mut state = self.state.lock();

        let attached = match state.leave(handle) {
            DetachOutcome::NotAttached => false,
            DetachOutcome::Remaining(subscribers) => {
                debug!(subscriber = handle.id(), subscribers, "Subscriber detached");
                true
            }
            DetachOutcome::TornDown { request_id, kind } => {
                if let Err(e) = self.wire.cancel(request_id, kind) {
                    warn!(request_id, kind = %kind, error = %e, "Wire cancel failed");
                }
                metrics::record_request_cancelled(kind);
                info!(request_id, kind = %kind, "Cancelled wire request");
                true
            }
        };

        metrics::set_registry_stats(state.stats());
        attached
    }

    /// Apply a field event to the record owning `request_id` and deliver the
    /// diff to its subscribers.
    ///
    /// Returns the number of subscribers the diff was sent to. Events for
    /// unknown request ids and events that change nothing deliver nothing.
    pub fn dispatch_update(&self, request_id: RequestId, event: FieldEvent) -> usize {
        let mut state = self.state.lock();

        let Some(record) = state.record_for_request_mut(request_id) else {
            debug!(request_id, "Dropping field event for unknown request");
            metrics::record_event_dropped(DropReason::UnknownRequest);
            return 0;
        };

        let (engine, sinks) = record.parts_mut();
        let diff = engine.apply(event);
        if diff.is_empty() {
            trace!(request_id, "Field event changed nothing");
            metrics::record_event_dropped(DropReason::NoChange);
            return 0;
        }

        let mut delivered = 0;
        for sink in sinks.values() {
            if sink.send(SubscriberEvent::Update(diff.clone())).is_ok() {
                delivered += 1;
            }
        }

        trace!(
            request_id,
            added = diff.added.len(),
            changed = diff.changed.len(),
            delivered,
            "Delivered diff"
        );
        metrics::record_diffs_delivered(delivered as u64);
        delivered
    }

    /// Route a gateway error.
    ///
    /// - connection-level: global channel only
    /// - warning: global channel only
    /// - fatal, record found: every subscriber of the record, then global
    /// - fatal, no record: global channel only
    pub fn dispatch_error(&self, event: ErrorEvent) {
        let event = self.options.error_policy.classify(event);

        if event.is_connection_level() {
            warn!(code = event.code, message = %event.message, "Connection-level gateway error");
            metrics::record_error(ErrorScope::Connection);
            self.errors.publish(event);
            return;
        }

        if matches!(event.severity, ErrorSeverity::Warning) {
            debug!(
                request_id = event.request_id,
                code = event.code,
                message = %event.message,
                "Gateway warning"
            );
            metrics::record_error(ErrorScope::Warning);
            self.errors.publish(event);
            return;
        }

        let notified = {
            let mut state = self.state.lock();
            let notified = state.record_for_request(event.request_id).map(|record| {
                for (_, sink) in record.sinks() {
                    let _ = sink.send(SubscriberEvent::Failed(event.clone()));
                }
                record.refcount()
            });
            state.retire(event.request_id);
            metrics::set_registry_stats(state.stats());
            notified
        };

        match notified {
            Some(subscribers) => {
                warn!(
                    request_id = event.request_id,
                    code = event.code,
                    message = %event.message,
                    subscribers,
                    "Request failed"
                );
                metrics::record_error(ErrorScope::Request);
            }
            None => {
                debug!(
                    request_id = event.request_id,
                    code = event.code,
                    "Error for request with no live record"
                );
                metrics::record_error(ErrorScope::Orphan);
            }
        }

        self.errors.publish(event);
    }

    /// Tell the subscribers of `request_id` that the gateway finished it.
    ///
    /// The record is retired: it stays until its subscribers detach, and a
    /// later attach for the same signature opens a new wire request.
    pub fn complete(&self, request_id: RequestId) {
        let mut state = self.state.lock();

        let Some(record) = state.record_for_request(request_id) else {
            debug!(request_id, "Completion for unknown request");
            metrics::record_event_dropped(DropReason::UnknownRequest);
            return;
        };

        for (_, sink) in record.sinks() {
            let _ = sink.send(SubscriberEvent::Completed);
        }
        debug!(request_id, subscribers = record.refcount(), "Request completed");
        state.retire(request_id);
    }

    /// Route one wire event.
    pub fn handle_wire_event(&self, event: WireEvent) {
        match event {
            WireEvent::Fields { request_id, event } => {
                self.dispatch_update(request_id, event);
            }
            WireEvent::Error(error) => self.dispatch_error(error),
            WireEvent::Completed { request_id } => self.complete(request_id),
        }
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.state.lock().stats()
    }

    /// Get the signatures of all live records.
    #[must_use]
    pub fn active_signatures(&self) -> Vec<RequestSignature> {
        self.state.lock().signatures()
    }

    /// Get the wire request id serving a signature.
    #[must_use]
    pub fn request_id_of(&self, signature: &RequestSignature) -> Option<RequestId> {
        self.state.lock().get(signature).map(|r| r.request_id())
    }

    /// Get the current snapshot of a signature as an all-added diff.
    #[must_use]
    pub fn snapshot_of(&self, signature: &RequestSignature) -> Option<UpdateDiff> {
        self.state.lock().get(signature).map(|r| r.engine().replay())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::field::{FieldId, FieldValue};
    use crate::domain::signature::{ContractKey, RequestKind, RequestParams};

    #[derive(Default)]
    struct FakeWire {
        connected: AtomicBool,
        next_id: AtomicI32,
        opened: Mutex<Vec<RequestSignature>>,
        cancelled: Mutex<Vec<RequestId>>,
    }

    impl FakeWire {
        fn connected() -> Arc<Self> {
            let wire = Self::default();
            wire.connected.store(true, Ordering::SeqCst);
            Arc::new(wire)
        }
    }

    impl WireAdapter for FakeWire {
        fn open(&self, signature: &RequestSignature) -> Result<RequestId, WireError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(WireError::NotConnected);
            }
            self.opened.lock().push(signature.clone());
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn cancel(&self, request_id: RequestId, _kind: RequestKind) -> Result<(), WireError> {
            self.cancelled.lock().push(request_id);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<ErrorEvent>>);

    impl ErrorSink for CollectingSink {
        fn publish(&self, event: ErrorEvent) {
            self.0.lock().push(event);
        }
    }

    fn registry(wire: &Arc<FakeWire>) -> (SubscriptionRegistry, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let registry = SubscriptionRegistry::new(
            Arc::clone(wire) as Arc<dyn WireAdapter>,
            Arc::clone(&sink) as Arc<dyn ErrorSink>,
            RegistryOptions::default(),
        );
        (registry, sink)
    }

    fn quotes(symbol: &str) -> RequestSignature {
        RequestSignature::new(
            RequestKind::MarketData,
            RequestParams::for_contract(ContractKey::default().with_symbol(symbol)),
        )
    }

    fn bid(v: i64) -> FieldEvent {
        FieldEvent::new().with(FieldId::native(1), FieldValue::Price(Decimal::from(v)))
    }

    #[test]
    fn attach_opens_once_per_signature() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);

        let _a = registry.attach(quotes("AAPL")).unwrap();
        let _b = registry.attach(quotes("AAPL")).unwrap();

        assert_eq!(wire.opened.lock().len(), 1);
        assert_eq!(registry.stats().subscriber_count, 2);
    }

    #[test]
    fn attach_when_disconnected_fails_without_record() {
        let wire = Arc::new(FakeWire::default());
        let (registry, _) = registry(&wire);

        let err = registry.attach(quotes("AAPL")).unwrap_err();

        assert_eq!(err, SubscribeError::NotConnected);
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn rejected_open_maps_to_wire_error() {
        assert_eq!(
            SubscribeError::from(WireError::Rejected("limit".to_string())),
            SubscribeError::Wire(WireError::Rejected("limit".to_string()))
        );
    }

    #[test]
    fn last_detach_cancels_exactly_once() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);
        let a = registry.attach(quotes("AAPL")).unwrap();
        let b = registry.attach(quotes("AAPL")).unwrap();

        assert!(registry.detach(&a.handle));
        assert!(wire.cancelled.lock().is_empty());

        assert!(registry.detach(&b.handle));
        assert!(!registry.detach(&b.handle));
        assert_eq!(*wire.cancelled.lock(), vec![1]);
        assert!(registry.active_signatures().is_empty());
    }

    #[test]
    fn update_fans_out_to_all_subscribers() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);
        let mut a = registry.attach(quotes("AAPL")).unwrap();
        let mut b = registry.attach(quotes("AAPL")).unwrap();

        assert_eq!(registry.dispatch_update(1, bid(10)), 2);

        for attachment in [&mut a, &mut b] {
            match attachment.events.try_recv().unwrap() {
                SubscriberEvent::Update(diff) => assert_eq!(diff.added.len(), 1),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn unchanged_event_is_not_delivered() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);
        let mut a = registry.attach(quotes("AAPL")).unwrap();

        registry.dispatch_update(1, bid(10));
        let _ = a.events.try_recv();

        assert_eq!(registry.dispatch_update(1, bid(10)), 0);
        assert!(a.events.try_recv().is_err());
    }

    #[test]
    fn update_for_unknown_request_is_dropped() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);

        assert_eq!(registry.dispatch_update(99, bid(10)), 0);
    }

    #[test]
    fn late_attacher_gets_snapshot_replay() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);
        let _a = registry.attach(quotes("AAPL")).unwrap();
        registry.dispatch_update(1, bid(10));

        let mut late = registry.attach(quotes("AAPL")).unwrap();

        match late.events.try_recv().unwrap() {
            SubscriberEvent::Update(diff) => {
                assert_eq!(
                    diff.added.get(&FieldId::native(1)),
                    Some(&FieldValue::Price(Decimal::from(10)))
                );
                assert!(diff.changed.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn replay_can_be_disabled() {
        let wire = FakeWire::connected();
        let registry = SubscriptionRegistry::new(
            Arc::clone(&wire) as Arc<dyn WireAdapter>,
            Arc::new(CollectingSink::default()),
            RegistryOptions {
                replay_snapshot: false,
                ..RegistryOptions::default()
            },
        );
        let _a = registry.attach(quotes("AAPL")).unwrap();
        registry.dispatch_update(1, bid(10));

        let mut late = registry.attach(quotes("AAPL")).unwrap();

        assert!(late.events.try_recv().is_err());
    }

    #[test]
    fn fatal_error_reaches_record_and_global_only() {
        let wire = FakeWire::connected();
        let (registry, global) = registry(&wire);
        let mut aapl = registry.attach(quotes("AAPL")).unwrap();
        let mut msft = registry.attach(quotes("MSFT")).unwrap();

        registry.dispatch_error(ErrorEvent::new(1, 200, "No security definition"));

        assert!(matches!(
            aapl.events.try_recv().unwrap(),
            SubscriberEvent::Failed(e) if e.code == 200
        ));
        assert!(msft.events.try_recv().is_err());
        assert_eq!(global.0.lock().len(), 1);
        assert_eq!(registry.stats().record_count, 2);
        assert!(registry.request_id_of(&quotes("AAPL")).is_none());
        assert_eq!(registry.request_id_of(&quotes("MSFT")), Some(2));
    }

    #[test]
    fn connection_error_goes_to_global_only() {
        let wire = FakeWire::connected();
        let (registry, global) = registry(&wire);
        let mut a = registry.attach(quotes("AAPL")).unwrap();

        registry.dispatch_error(ErrorEvent::connection(1100, "Connectivity lost"));

        assert!(a.events.try_recv().is_err());
        assert_eq!(global.0.lock()[0].code, 1100);
    }

    #[test]
    fn warning_goes_to_global_only() {
        let wire = FakeWire::connected();
        let (registry, global) = registry(&wire);
        let mut a = registry.attach(quotes("AAPL")).unwrap();

        registry.dispatch_error(ErrorEvent::new(1, 2104, "Market data farm OK"));

        assert!(a.events.try_recv().is_err());
        assert_eq!(global.0.lock()[0].severity, ErrorSeverity::Warning);
    }

    #[test]
    fn error_after_teardown_goes_to_global_only() {
        let wire = FakeWire::connected();
        let (registry, global) = registry(&wire);
        let a = registry.attach(quotes("AAPL")).unwrap();
        registry.detach(&a.handle);

        registry.dispatch_error(ErrorEvent::new(1, 200, "late"));

        assert_eq!(global.0.lock().len(), 1);
    }

    #[test]
    fn completion_notifies_without_teardown() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);
        let mut a = registry.attach(quotes("AAPL")).unwrap();

        registry.handle_wire_event(WireEvent::Completed { request_id: 1 });

        assert_eq!(a.events.try_recv().unwrap(), SubscriberEvent::Completed);
        assert_eq!(registry.stats().record_count, 1);
        assert!(registry.request_id_of(&quotes("AAPL")).is_none());
        assert!(wire.cancelled.lock().is_empty());

        assert!(registry.detach(&a.handle));
        assert_eq!(*wire.cancelled.lock(), vec![1]);
    }

    #[test]
    fn attach_after_completion_opens_new_request() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);
        let early = registry.attach(quotes("AAPL")).unwrap();
        registry.dispatch_update(1, bid(5));
        registry.complete(1);

        let mut late = registry.attach(quotes("AAPL")).unwrap();

        assert_eq!(wire.opened.lock().len(), 2);
        assert_eq!(late.handle.request_id(), 2);
        assert!(late.events.try_recv().is_err());

        registry.dispatch_update(2, bid(6));
        assert!(matches!(late.events.try_recv().unwrap(), SubscriberEvent::Update(_)));

        assert!(registry.detach(&early.handle));
        assert_eq!(*wire.cancelled.lock(), vec![1]);
        assert_eq!(registry.request_id_of(&quotes("AAPL")), Some(2));
    }

    #[test]
    fn attach_after_fatal_error_opens_new_request() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);
        let mut failed = registry.attach(quotes("AAPL")).unwrap();
        registry.dispatch_error(ErrorEvent::new(1, 200, "No security definition"));

        let late = registry.attach(quotes("AAPL")).unwrap();

        assert_eq!(wire.opened.lock().len(), 2);
        assert_eq!(late.handle.request_id(), 2);
        assert!(matches!(failed.events.try_recv().unwrap(), SubscriberEvent::Failed(_)));
        assert_eq!(registry.stats().record_count, 2);

        registry.detach(&failed.handle);
        registry.detach(&late.handle);
        assert_eq!(*wire.cancelled.lock(), vec![1, 2]);
    }

    #[test]
    fn join_existing_record_fails_when_disconnected() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);
        let _a = registry.attach(quotes("AAPL")).unwrap();
        wire.connected.store(false, Ordering::SeqCst);

        let err = registry.attach(quotes("AAPL")).unwrap_err();

        assert_eq!(err, SubscribeError::NotConnected);
        assert_eq!(registry.stats().subscriber_count, 1);
        assert_eq!(wire.opened.lock().len(), 1);
    }

    #[test]
    fn snapshot_of_reflects_applied_events() {
        let wire = FakeWire::connected();
        let (registry, _) = registry(&wire);
        let _a = registry.attach(quotes("AAPL")).unwrap();

        registry.handle_wire_event(WireEvent::Fields {
            request_id: 1,
            event: bid(7),
        });

        let snapshot = registry.snapshot_of(&quotes("AAPL")).unwrap();
        assert_eq!(snapshot.added.len(), 1);
        assert!(registry.snapshot_of(&quotes("MSFT")).is_none());
    }
}
