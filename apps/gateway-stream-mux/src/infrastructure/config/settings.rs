//! Mux Configuration Settings
//!
//! Configuration types for the subscription mux, loaded from environment
//! variables. Absent variables fall back to defaults; present but invalid
//! values are errors.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::application::services::registry::RegistryOptions;
use crate::domain::error_event::ErrorPolicy;
use crate::domain::signature::{ContractKey, parse_generic_fields};

/// Wire event queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Capacity of the bounded queue between the wire and the dispatcher.
    pub wire_event_capacity: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            wire_event_capacity: 4_096,
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Capacity of the global error channel.
    pub error_channel_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            error_channel_capacity: 1_024,
        }
    }
}

/// Registry behavior settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Replay the current snapshot to late attachers.
    pub replay_snapshot: bool,
    /// Error codes treated as warnings.
    pub error_policy: ErrorPolicy,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            replay_snapshot: true,
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl From<RegistrySettings> for RegistryOptions {
    fn from(settings: RegistrySettings) -> Self {
        Self {
            replay_snapshot: settings.replay_snapshot,
            error_policy: settings.error_policy,
        }
    }
}

/// Simulated gateway settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorSettings {
    /// Interval between simulated market data ticks.
    pub tick_interval: Duration,
    /// Whether the simulated connection starts up.
    pub connected: bool,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            connected: true,
        }
    }
}

/// Demo binary settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSettings {
    /// Contract symbol.
    pub symbol: String,
    /// Gateway contract id (0 = not set).
    pub con_id: i64,
    /// Security type.
    pub sec_type: String,
    /// Exchange.
    pub exchange: String,
    /// Currency.
    pub currency: String,
    /// Extra generic fields to request.
    pub generic_fields: BTreeSet<u16>,
    /// Diffs to print per subscriber before detaching (0 = until Ctrl-C).
    pub ticks: u64,
    /// Number of subscribers sharing the request.
    pub subscribers: usize,
    /// Print the Prometheus exposition on shutdown.
    pub print_metrics: bool,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            symbol: "AAPL".to_string(),
            con_id: 0,
            sec_type: "STK".to_string(),
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            generic_fields: BTreeSet::new(),
            ticks: 20,
            subscribers: 2,
            print_metrics: false,
        }
    }
}

impl DemoSettings {
    /// Build the contract key for the demo request.
    #[must_use]
    pub fn contract(&self) -> ContractKey {
        ContractKey::default()
            .with_con_id(self.con_id)
            .with_symbol(&self.symbol)
            .with_sec_type(&self.sec_type)
            .with_exchange(&self.exchange)
            .with_currency(&self.currency)
    }
}

/// Complete mux configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxConfig {
    /// Wire event queue settings.
    pub dispatch: DispatchSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
    /// Registry behavior settings.
    pub registry: RegistrySettings,
    /// Simulated gateway settings.
    pub simulator: SimulatorSettings,
    /// Demo binary settings.
    pub demo: DemoSettings,
}

impl MuxConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a key maps to a value that cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let dispatch = DispatchSettings {
            wire_event_capacity: env.parse(
                "MUX_WIRE_EVENT_CAPACITY",
                DispatchSettings::default().wire_event_capacity,
            )?,
        };

        let broadcast = BroadcastSettings {
            error_channel_capacity: env.parse(
                "MUX_ERROR_CHANNEL_CAPACITY",
                BroadcastSettings::default().error_channel_capacity,
            )?,
        };

        let registry = RegistrySettings {
            replay_snapshot: env.bool(
                "MUX_REPLAY_SNAPSHOT",
                RegistrySettings::default().replay_snapshot,
            )?,
            error_policy: env.with("MUX_WARNING_CODES", ErrorPolicy::default(), |v| {
                ErrorPolicy::parse(v).ok()
            })?,
        };

        let simulator = SimulatorSettings {
            tick_interval: env
                .parse::<u64>("MUX_SIM_TICK_INTERVAL_MS", 250)
                .map(Duration::from_millis)?,
            connected: env.bool("MUX_SIM_CONNECTED", SimulatorSettings::default().connected)?,
        };

        let defaults = DemoSettings::default();
        let demo = DemoSettings {
            symbol: env.string("MUX_DEMO_SYMBOL", defaults.symbol),
            con_id: env.parse("MUX_DEMO_CON_ID", defaults.con_id)?,
            sec_type: env.string("MUX_DEMO_SEC_TYPE", defaults.sec_type),
            exchange: env.string("MUX_DEMO_EXCHANGE", defaults.exchange),
            currency: env.string("MUX_DEMO_CURRENCY", defaults.currency),
            generic_fields: env.with("MUX_DEMO_GENERIC_FIELDS", defaults.generic_fields, |v| {
                parse_generic_fields(v).ok()
            })?,
            ticks: env.parse("MUX_DEMO_TICKS", defaults.ticks)?,
            subscribers: env.parse("MUX_DEMO_SUBSCRIBERS", defaults.subscribers)?,
            print_metrics: env.bool("MUX_DEMO_PRINT_METRICS", defaults.print_metrics)?,
        };

        Ok(Self {
            dispatch,
            broadcast,
            registry,
            simulator,
            demo,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable is set but cannot be parsed.
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn with<T>(
        &self,
        key: &str,
        default: T,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<T, ConfigError> {
        let Some(raw) = (self.0)(key) else {
            return Ok(default);
        };
        parse(raw.trim()).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        })
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.with(key, default, |v| v.parse().ok())
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        self.with(key, default, |v| match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
    }

    fn string(&self, key: &str, default: String) -> String {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
    }
}
