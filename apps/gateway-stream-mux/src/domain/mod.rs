//! Domain Layer - Subscription records and update diffing.
//!
//! Pure types with no I/O: field identifiers, request signatures, the
//! incremental update engine, gateway error events and the reference-counted
//! subscription table.

/// Gateway error events and severity policy.
pub mod error_event;

/// Typed field identifiers and values.
pub mod field;

/// Normalized request signatures.
pub mod signature;

/// Incremental update engine.
pub mod snapshot;

/// Reference-counted subscription records.
pub mod subscription;
