//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the registry and dispatch services and the port
//! interfaces that define how they reach the gateway connection.

/// Port interfaces for the gateway connection and error channel.
pub mod ports;

/// Registry and dispatch services.
pub mod services;
