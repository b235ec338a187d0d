//! Gateway Stream Mux Demo
//!
//! Subscribes several consumers to the same market data request on the
//! simulated gateway and prints every diff they receive as one JSON line.
//! All consumers share one wire request.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin gateway-stream-mux
//! MUX_DEMO_SYMBOL=MSFT MUX_DEMO_SUBSCRIBERS=3 MUX_DEMO_TICKS=0 cargo run --bin gateway-stream-mux
//! ```
//!
//! # Environment Variables
//!
//! - `MUX_WIRE_EVENT_CAPACITY`: wire event queue capacity (default: 4096)
//! - `MUX_ERROR_CHANNEL_CAPACITY`: global error channel capacity (default: 1024)
//! - `MUX_WARNING_CODES`: codes treated as warnings (default: 2100-2169,10167)
//! - `MUX_REPLAY_SNAPSHOT`: replay snapshot to late subscribers (default: true)
//! - `MUX_SIM_TICK_INTERVAL_MS`: simulated tick interval (default: 250)
//! - `MUX_SIM_CONNECTED`: start the simulated connection up (default: true)
//! - `MUX_DEMO_SYMBOL` / `MUX_DEMO_CON_ID` / `MUX_DEMO_SEC_TYPE` /
//!   `MUX_DEMO_EXCHANGE` / `MUX_DEMO_CURRENCY`: contract (default: AAPL STK SMART USD)
//! - `MUX_DEMO_GENERIC_FIELDS`: extra generic fields, comma separated
//! - `MUX_DEMO_TICKS`: diffs per subscriber, 0 = until Ctrl+C (default: 20)
//! - `MUX_DEMO_SUBSCRIBERS`: number of subscribers (default: 2)
//! - `MUX_DEMO_PRINT_METRICS`: print Prometheus metrics on exit (default: false)
//! - `OTEL_ENABLED`: Enable OpenTelemetry span export (default: true)
//! - `MUX_LOG_DIRECTIVE`: base log filter (default: gateway_stream_mux=info)
//! - `RUST_LOG`: extra log filter directives

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use futures::StreamExt;
use gateway_stream_mux::application::ports::{ErrorSink, WireAdapter};
use gateway_stream_mux::application::services::dispatcher::{Dispatcher, wire_channel};
use gateway_stream_mux::application::services::registry::SubscriptionRegistry;
use gateway_stream_mux::domain::field::{FieldId, FieldValue};
use gateway_stream_mux::domain::snapshot::UpdateDiff;
use gateway_stream_mux::infrastructure::broadcast::ErrorHub;
use gateway_stream_mux::infrastructure::simulator::{SimulatedGateway, catalog};
use gateway_stream_mux::infrastructure::stream::{StreamMux, UpdateStream};
use gateway_stream_mux::infrastructure::telemetry;
use gateway_stream_mux::{MuxConfig, init_metrics};
use serde::Serialize;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting gateway stream mux demo");

    let metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = MuxConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let (wire_sender, wire_events) = wire_channel(config.dispatch.wire_event_capacity);
    let error_hub = Arc::new(ErrorHub::new(config.broadcast.clone().into()));
    let gateway = Arc::new(SimulatedGateway::new(&config.simulator, wire_sender));

    let registry = Arc::new(SubscriptionRegistry::new(
        Arc::clone(&gateway) as Arc<dyn WireAdapter>,
        Arc::clone(&error_hub) as Arc<dyn ErrorSink>,
        config.registry.clone().into(),
    ));
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        wire_events,
        shutdown_token.clone(),
    )
    .spawn();

    let mux = StreamMux::new(Arc::clone(&registry), error_hub);

    let mut errors = mux.errors();
    let error_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = error_shutdown.cancelled() => break,
                event = errors.next() => {
                    let Some(event) = event else { break };
                    tracing::warn!(
                        request_id = event.request_id,
                        code = event.code,
                        severity = ?event.severity,
                        message = %event.message,
                        "Gateway error"
                    );
                }
            }
        }
    });

    let mut subscribers = JoinSet::new();
    for subscriber in 1..=config.demo.subscribers.max(1) {
        let stream = mux
            .market_data(
                config.demo.contract(),
                config.demo.generic_fields.iter().copied(),
                false,
                false,
            )
            .with_context(|| format!("subscriber {subscriber} failed to subscribe"))?;
        subscribers.spawn(print_diffs(
            subscriber,
            stream,
            config.demo.ticks,
            shutdown_token.clone(),
        ));
    }

    let stats = registry.stats();
    tracing::info!(
        records = stats.record_count,
        subscribers = stats.subscriber_count,
        "Demo subscribers attached"
    );

    tokio::select! {
        () = await_shutdown() => {}
        () = async { while subscribers.join_next().await.is_some() {} } => {
            tracing::info!("All subscribers finished");
        }
    }

    shutdown_token.cancel();
    subscribers.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, dispatcher).await {
        Ok(Ok(applied)) => tracing::info!(applied, "Dispatcher stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Dispatcher task failed"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Dispatcher did not stop in time"
        ),
    }

    let stats = registry.stats();
    tracing::info!(
        records = stats.record_count,
        subscribers = stats.subscriber_count,
        active_feeds = gateway.active_feeds(),
        "Gateway stream mux stopped"
    );

    if config.demo.print_metrics {
        println!("{}", metrics_handle.render());
    }

    Ok(())
}

/// One printed diff.
#[derive(Serialize)]
struct DiffLine {
    subscriber: usize,
    added: BTreeMap<String, FieldValue>,
    changed: BTreeMap<String, FieldValue>,
}

impl DiffLine {
    fn new(subscriber: usize, diff: UpdateDiff) -> Self {
        let labeled = |fields: HashMap<FieldId, FieldValue>| -> BTreeMap<String, FieldValue> {
            fields
                .into_iter()
                .map(|(field, value)| (catalog::label(field).into_owned(), value))
                .collect()
        };
        Self {
            subscriber,
            added: labeled(diff.added),
            changed: labeled(diff.changed),
        }
    }
}

/// Print diffs for one subscriber until `ticks` diffs, stream end or shutdown.
///
/// Returning drops the stream, which releases the subscription.
async fn print_diffs(
    subscriber: usize,
    mut stream: UpdateStream,
    ticks: u64,
    shutdown: CancellationToken,
) {
    let mut printed = 0_u64;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            item = stream.next() => match item {
                Some(Ok(diff)) => {
                    match serde_json::to_string(&DiffLine::new(subscriber, diff)) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::error!(error = %e, "Failed to encode diff"),
                    }
                    printed += 1;
                    if ticks > 0 && printed >= ticks {
                        break;
                    }
                }
                Some(Err(error)) => {
                    tracing::error!(subscriber, error = %error, "Subscription failed");
                    break;
                }
                None => break,
            },
        }
    }

    tracing::info!(subscriber, printed, "Subscriber done");
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &MuxConfig) {
    tracing::info!(
        wire_event_capacity = config.dispatch.wire_event_capacity,
        error_channel_capacity = config.broadcast.error_channel_capacity,
        replay_snapshot = config.registry.replay_snapshot,
        tick_interval_ms = u64::try_from(config.simulator.tick_interval.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded"
    );
    tracing::debug!(
        symbol = %config.demo.symbol,
        sec_type = %config.demo.sec_type,
        exchange = %config.demo.exchange,
        currency = %config.demo.currency,
        subscribers = config.demo.subscribers,
        ticks = config.demo.ticks,
        "Demo request"
    );
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
