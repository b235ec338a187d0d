//! Configuration Module
//!
//! Configuration loading for the mux and the demo binary.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, DemoSettings, DispatchSettings, MuxConfig, RegistrySettings,
    SimulatorSettings,
};
