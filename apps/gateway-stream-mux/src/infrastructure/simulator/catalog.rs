//! Demo field catalog.
//!
//! Display names for the fields the simulated gateway emits. The registry
//! never looks at these.

use std::borrow::Cow;

use crate::domain::field::{FieldId, FieldNamespace};

/// Bid size.
pub const BID_SIZE: FieldId = FieldId::native(0);
/// Bid price.
pub const BID: FieldId = FieldId::native(1);
/// Ask price.
pub const ASK: FieldId = FieldId::native(2);
/// Ask size.
pub const ASK_SIZE: FieldId = FieldId::native(3);
/// Last trade price.
pub const LAST: FieldId = FieldId::native(4);
/// Last trade size.
pub const LAST_SIZE: FieldId = FieldId::native(5);
/// Session high.
pub const HIGH: FieldId = FieldId::native(6);
/// Session low.
pub const LOW: FieldId = FieldId::native(7);
/// Session volume.
pub const VOLUME: FieldId = FieldId::native(8);
/// Previous close.
pub const CLOSE: FieldId = FieldId::native(9);

/// Mid price, computed from bid and ask.
pub const MID: FieldId = FieldId::synthetic(1);
/// Bid/ask spread, computed from bid and ask.
pub const SPREAD: FieldId = FieldId::synthetic(2);

/// Display name for a field; unknown ids render as `native:N` / `synthetic:N`.
#[must_use]
pub fn label(field: FieldId) -> Cow<'static, str> {
    let name = match (field.namespace(), field.index()) {
        (FieldNamespace::Native, 0) => "bid_size",
        (FieldNamespace::Native, 1) => "bid",
        (FieldNamespace::Native, 2) => "ask",
        (FieldNamespace::Native, 3) => "ask_size",
        (FieldNamespace::Native, 4) => "last",
        (FieldNamespace::Native, 5) => "last_size",
        (FieldNamespace::Native, 6) => "high",
        (FieldNamespace::Native, 7) => "low",
        (FieldNamespace::Native, 8) => "volume",
        (FieldNamespace::Native, 9) => "close",
        (FieldNamespace::Synthetic, 1) => "mid",
        (FieldNamespace::Synthetic, 2) => "spread",
        _ => return Cow::Owned(field.to_string()),
    };
    Cow::Borrowed(name)
}
