//! Field Identifiers and Values
//!
//! Typed keys and values for the per-request field snapshot.
//!
//! # Namespaces
//!
//! Identifiers live in one of two disjoint namespaces:
//! - **Native**: field indices defined by the gateway protocol
//! - **Synthetic**: fields computed on the client side (mid, spread, ...)
//!
//! The namespace is part of the key, so `native(5)` and `synthetic(5)` are
//! different fields. The flat integer encoding used on the wire, where
//! synthetic ids start at [`SYNTHETIC_FIELD_BOUNDARY`], is only handled at
//! the adapter edge through [`FieldId::from_raw`] and [`FieldId::to_raw`].

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// First raw identifier reserved for synthetic fields on the wire.
pub const SYNTHETIC_FIELD_BOUNDARY: i64 = 1_000_000;

// =============================================================================
// Field Identifier
// =============================================================================

/// Namespace a field identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldNamespace {
    /// Protocol-defined field.
    Native,
    /// Client-computed field.
    Synthetic,
}

impl FieldNamespace {
    /// Get the namespace name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Synthetic => "synthetic",
        }
    }
}

/// Typed field identifier: `{namespace, index}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldId {
    namespace: FieldNamespace,
    index: u32,
}

impl FieldId {
    /// Create a native (protocol-defined) field identifier.
    #[must_use]
    pub const fn native(index: u32) -> Self {
        Self {
            namespace: FieldNamespace::Native,
            index,
        }
    }

    /// Create a synthetic (computed) field identifier.
    #[must_use]
    pub const fn synthetic(index: u32) -> Self {
        Self {
            namespace: FieldNamespace::Synthetic,
            index,
        }
    }

    /// Get the namespace.
    #[must_use]
    pub const fn namespace(self) -> FieldNamespace {
        self.namespace
    }

    /// Get the index within the namespace.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Check if this is a synthetic field.
    #[must_use]
    pub const fn is_synthetic(self) -> bool {
        matches!(self.namespace, FieldNamespace::Synthetic)
    }

    /// Decode a flat wire identifier.
    ///
    /// Values at or above [`SYNTHETIC_FIELD_BOUNDARY`] are synthetic, values
    /// below it are native. Negative or out-of-range values yield `None`.
    #[must_use]
    pub fn from_raw(raw: i64) -> Option<Self> {
        if raw < 0 {
            return None;
        }
        if raw >= SYNTHETIC_FIELD_BOUNDARY {
            return u32::try_from(raw - SYNTHETIC_FIELD_BOUNDARY)
                .ok()
                .map(Self::synthetic);
        }
        u32::try_from(raw).ok().map(Self::native)
    }

    /// Encode as a flat wire identifier.
    ///
    /// Returns `None` for a native index that would land in the synthetic
    /// range; such a field can be held in a snapshot but has no flat encoding.
    #[must_use]
    pub fn to_raw(self) -> Option<i64> {
        let index = i64::from(self.index);
        match self.namespace {
            FieldNamespace::Native if index >= SYNTHETIC_FIELD_BOUNDARY => None,
            FieldNamespace::Native => Some(index),
            FieldNamespace::Synthetic => SYNTHETIC_FIELD_BOUNDARY.checked_add(index),
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace.as_str(), self.index)
    }
}

// =============================================================================
// Field Value
// =============================================================================

/// Last known value of a field.
///
/// Equality is exact: decimals compare by value without tolerance
/// (`1.0 == 1.00`), strings and timestamps compare exactly, and values of
/// different kinds are never equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A price.
    Price(Decimal),
    /// A size or volume.
    Size(Decimal),
    /// Any other numeric value (ratios, greeks, counters).
    Number(Decimal),
    /// Free text or an enum rendered as text.
    Text(String),
    /// A point in time.
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Get the numeric value, if this is a numeric kind.
    #[must_use]
    pub const fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Price(v) | Self::Size(v) | Self::Number(v) => Some(*v),
            Self::Text(_) | Self::Timestamp(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Price(v) | Self::Size(v) | Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
