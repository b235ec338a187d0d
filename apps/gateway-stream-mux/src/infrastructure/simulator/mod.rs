//! Simulated Gateway
//!
//! An in-process [`WireAdapter`] for the demo binary and for end-to-end
//! tests. Market data requests get a random-walk quote feed on a timer;
//! every tick pushes the full quote (native fields plus synthetic mid and
//! spread), leaving it to the update engine to drop what did not move.
//!
//! - snapshot requests push one tick, then complete
//! - other request kinds fail with error 321
//! - [`SimulatedGateway::disconnect`] stops every feed and raises
//!   connection-level error 1100

pub mod catalog;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::ports::{WireAdapter, WireError, WireEvent};
use crate::application::services::dispatcher::WireEventSender;
use crate::domain::error_event::{ErrorEvent, RequestId};
use crate::domain::field::FieldValue;
use crate::domain::signature::{RequestKind, RequestSignature};
use crate::domain::snapshot::FieldEvent;
use crate::infrastructure::config::SimulatorSettings;

/// Error code for a request the gateway cannot serve.
pub const CODE_REQUEST_INVALID: i32 = 321;
/// Error code for lost connectivity.
pub const CODE_CONNECTIVITY_LOST: i32 = 1100;
/// Error code for restored connectivity after data loss.
pub const CODE_CONNECTIVITY_RESTORED: i32 = 1101;

// =============================================================================
// Gateway
// =============================================================================

/// In-process gateway connection.
pub struct SimulatedGateway {
    tick_interval: Duration,
    events: WireEventSender,
    connected: AtomicBool,
    next_request_id: AtomicI32,
    feeds: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl std::fmt::Debug for SimulatedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedGateway")
            .field("tick_interval", &self.tick_interval)
            .field("connected", &self.is_connected())
            .field("active_feeds", &self.active_feeds())
            .finish_non_exhaustive()
    }
}

impl SimulatedGateway {
    /// Create a gateway that pushes its callbacks into `events`.
    #[must_use]
    pub fn new(settings: &SimulatorSettings, events: WireEventSender) -> Self {
        Self {
            tick_interval: settings.tick_interval,
            events,
            connected: AtomicBool::new(settings.connected),
            next_request_id: AtomicI32::new(1),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Check if the simulated connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of feeds still producing ticks.
    #[must_use]
    pub fn active_feeds(&self) -> usize {
        self.feeds
            .lock()
            .values()
            .filter(|token| !token.is_cancelled())
            .count()
    }

    /// Drop the connection: stop all feeds and raise a connection-level error.
    pub fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        for (_, token) in self.feeds.lock().drain() {
            token.cancel();
        }
        info!("Simulated gateway disconnected");
        self.events.emit(WireEvent::Error(ErrorEvent::connection(
            CODE_CONNECTIVITY_LOST,
            "Connectivity to the gateway has been lost",
        )));
    }

    /// Restore the connection. Requests open before the disconnect stay dead.
    pub fn reconnect(&self) {
        if self.connected.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Simulated gateway reconnected");
        self.events.emit(WireEvent::Error(ErrorEvent::connection(
            CODE_CONNECTIVITY_RESTORED,
            "Connectivity to the gateway has been restored, data lost",
        )));
    }

    fn start_feed(&self, request_id: RequestId, signature: &RequestSignature) -> Result<(), WireError> {
        let runtime = Handle::try_current()
            .map_err(|_| WireError::Rejected("simulated gateway needs a tokio runtime".to_string()))?;

        let token = CancellationToken::new();
        self.feeds.lock().insert(request_id, token.clone());

        let feed = QuoteFeed {
            request_id,
            events: self.events.clone(),
            tick_interval: self.tick_interval,
            one_shot: signature.params().is_snapshot()
                || signature.params().is_regulatory_snapshot(),
            quote: Quote::seed(),
        };
        runtime.spawn(feed.run(token));
        Ok(())
    }
}

impl WireAdapter for SimulatedGateway {
    fn open(&self, signature: &RequestSignature) -> Result<RequestId, WireError> {
        if !self.is_connected() {
            return Err(WireError::NotConnected);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);

        match signature.kind() {
            RequestKind::MarketData => self.start_feed(request_id, signature)?,
            other => {
                debug!(request_id, kind = %other, "Simulated gateway rejecting request");
                self.events.emit(WireEvent::Error(ErrorEvent::new(
                    request_id,
                    CODE_REQUEST_INVALID,
                    format!("Error validating request: {other} is not supported"),
                )));
            }
        }

        Ok(request_id)
    }

    fn cancel(&self, request_id: RequestId, kind: RequestKind) -> Result<(), WireError> {
        match self.feeds.lock().remove(&request_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None if kind == RequestKind::MarketData && self.is_connected() => Err(
                WireError::Rejected(format!("no feed for request {request_id}")),
            ),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        Self::is_connected(self)
    }
}

// =============================================================================
// Quote Feed
// =============================================================================

struct QuoteFeed {
    request_id: RequestId,
    events: WireEventSender,
    tick_interval: Duration,
    one_shot: bool,
    quote: Quote,
}

impl QuoteFeed {
    async fn run(mut self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(request_id = self.request_id, "Simulated feed cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let event = self.quote.step();
                    let fields = WireEvent::Fields { request_id: self.request_id, event };
                    if !self.events.send(fields).await {
                        break;
                    }
                    if self.one_shot {
                        let _ = self.events.send(WireEvent::Completed { request_id: self.request_id }).await;
                        token.cancel();
                        break;
                    }
                }
            }
        }
    }
}

/// Random-walk quote state, in cents.
#[derive(Debug, Clone)]
struct Quote {
    last: i64,
    spread: i64,
    bid_size: i64,
    ask_size: i64,
    last_size: i64,
    high: i64,
    low: i64,
    volume: i64,
    close: i64,
}

impl Quote {
    fn seed() -> Self {
        let mut rng = rand::rng();
        let last = rng.random_range(5_000..=50_000);
        Self {
            last,
            spread: rng.random_range(1..=4),
            bid_size: rng.random_range(1..=20) * 100,
            ask_size: rng.random_range(1..=20) * 100,
            last_size: 100,
            high: last,
            low: last,
            volume: 0,
            close: last,
        }
    }

    fn step(&mut self) -> FieldEvent {
        let mut rng = rand::rng();

        if rng.random_bool(0.6) {
            self.last = (self.last + rng.random_range(-10..=10)).max(1);
            self.last_size = rng.random_range(1..=5) * 100;
            self.volume += self.last_size;
            self.high = self.high.max(self.last);
            self.low = self.low.min(self.last);
        }
        if rng.random_bool(0.3) {
            self.spread = rng.random_range(1..=4);
        }
        if rng.random_bool(0.3) {
            self.bid_size = rng.random_range(1..=20) * 100;
            self.ask_size = rng.random_range(1..=20) * 100;
        }

        let bid = (self.last - self.spread / 2).max(1);
        let ask = bid + self.spread;
        let price = |cents: i64| FieldValue::Price(Decimal::new(cents, 2));
        let size = |units: i64| FieldValue::Size(Decimal::from(units));

        FieldEvent::new()
            .with(catalog::BID_SIZE, size(self.bid_size))
            .with(catalog::BID, price(bid))
            .with(catalog::ASK, price(ask))
            .with(catalog::ASK_SIZE, size(self.ask_size))
            .with(catalog::LAST, price(self.last))
            .with(catalog::LAST_SIZE, size(self.last_size))
            .with(catalog::HIGH, price(self.high))
            .with(catalog::LOW, price(self.low))
            .with(catalog::VOLUME, size(self.volume))
            .with(catalog::CLOSE, price(self.close))
            .with(catalog::MID, FieldValue::Price(Decimal::new(bid + ask, 2) / Decimal::TWO))
            .with(catalog::SPREAD, price(ask - bid))
    }
}

// =============================================================================
// Tests
// =============================================================================
