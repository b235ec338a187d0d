//! Application Services
//!
//! - `registry`: reference-counted subscription registry and error routing
//! - `dispatcher`: serialized application of wire events to the registry

/// Subscription registry.
pub mod registry;

/// Wire event queue and dispatch loop.
pub mod dispatcher;
