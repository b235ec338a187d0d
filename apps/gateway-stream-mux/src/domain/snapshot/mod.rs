//! Incremental Update Engine
//!
//! Turns repeated full or partial field snapshots into `{added, changed}`
//! diffs against the last known state of one request.
//!
//! # Rules
//!
//! Every `(field, value)` pair of an incoming event is stored in event order,
//! so the last value for a field wins. Each touched field is then compared
//! with its value from before the event:
//! - no value before: reported in `added`
//! - a different value before: reported in `changed`
//! - an equal value before: not reported
//!
//! A field written twice in one event and left at its old value is therefore
//! not reported. Native and synthetic fields are handled the same way; the
//! engine never looks at the namespace.

use std::collections::HashMap;

use crate::domain::field::{FieldId, FieldValue};

// =============================================================================
// Raw Field Event
// =============================================================================

/// A batch of field values pushed by the wire for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldEvent {
    fields: Vec<(FieldId, FieldValue)>,
}

impl FieldEvent {
    /// Create an empty event.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add a field value (builder style).
    #[must_use]
    pub fn with(mut self, field: FieldId, value: FieldValue) -> Self {
        self.fields.push((field, value));
        self
    }

    /// Add a field value.
    pub fn push(&mut self, field: FieldId, value: FieldValue) {
        self.fields.push((field, value));
    }

    /// Number of field values in the event.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the event carries no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over the field values in event order.
    pub fn iter(&self) -> impl Iterator<Item = &(FieldId, FieldValue)> {
        self.fields.iter()
    }
}

impl FromIterator<(FieldId, FieldValue)> for FieldEvent {
    fn from_iter<I: IntoIterator<Item = (FieldId, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FieldEvent {
    type Item = (FieldId, FieldValue);
    type IntoIter = std::vec::IntoIter<(FieldId, FieldValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

// =============================================================================
// Update Diff
// =============================================================================

/// Delta between two consecutive snapshots of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateDiff {
    /// Fields not previously present.
    pub added: HashMap<FieldId, FieldValue>,
    /// Fields previously present whose value differs.
    pub changed: HashMap<FieldId, FieldValue>,
}

impl UpdateDiff {
    /// Check if the diff carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty()
    }

    /// Total number of added and changed fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len()
    }

    /// Look up a field in either `added` or `changed`.
    #[must_use]
    pub fn get(&self, field: FieldId) -> Option<&FieldValue> {
        self.added.get(&field).or_else(|| self.changed.get(&field))
    }

    /// Iterate over added then changed fields.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldId, &FieldValue)> {
        self.added.iter().chain(self.changed.iter())
    }
}

// =============================================================================
// Update Engine
// =============================================================================

/// Per-request snapshot holder and diff calculator.
#[derive(Debug, Clone, Default)]
pub struct UpdateEngine {
    snapshot: HashMap<FieldId, FieldValue>,
}

impl UpdateEngine {
    /// Create an engine with an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event to the snapshot and return the resulting diff.
    pub fn apply(&mut self, event: FieldEvent) -> UpdateDiff {
        let mut before: HashMap<FieldId, Option<FieldValue>> = HashMap::new();

        for (field, value) in event {
            let previous = self.snapshot.insert(field, value);
            before.entry(field).or_insert(previous);
        }

        let mut diff = UpdateDiff::default();

        for (field, previous) in before {
            let Some(current) = self.snapshot.get(&field) else {
                continue;
            };
            match previous {
                None => {
                    diff.added.insert(field, current.clone());
                }
                Some(old) if old != *current => {
                    diff.changed.insert(field, current.clone());
                }
                Some(_) => {}
            }
        }

        diff
    }

    /// The whole current snapshot expressed as a diff of added fields.
    #[must_use]
    pub fn replay(&self) -> UpdateDiff {
        UpdateDiff {
            added: self.snapshot.clone(),
            changed: HashMap::new(),
        }
    }

    /// Get the current snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> &HashMap<FieldId, FieldValue> {
        &self.snapshot
    }

    /// Number of fields in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    /// Check if no field has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    const A: FieldId = FieldId::native(1);
    const B: FieldId = FieldId::native(2);

    fn num(v: i64) -> FieldValue {
        FieldValue::Number(Decimal::from(v))
    }

    #[test]
    fn first_event_adds_everything() {
        let mut engine = UpdateEngine::new();

        let diff = engine.apply(FieldEvent::new().with(A, num(1)));

        assert_eq!(diff.added.get(&A), Some(&num(1)));
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn unchanged_field_is_not_reported() {
        let mut engine = UpdateEngine::new();
        engine.apply(FieldEvent::new().with(A, num(1)));

        let diff = engine.apply(FieldEvent::new().with(A, num(1)).with(B, num(2)));

        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added.get(&B), Some(&num(2)));
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn changed_value_is_reported_in_changed() {
        let mut engine = UpdateEngine::new();
        engine.apply(FieldEvent::new().with(A, num(1)));
        engine.apply(FieldEvent::new().with(A, num(1)).with(B, num(2)));

        let diff = engine.apply(FieldEvent::new().with(A, num(5)).with(B, num(2)));

        assert!(diff.added.is_empty());
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed.get(&A), Some(&num(5)));
        assert_eq!(engine.snapshot().get(&A), Some(&num(5)));
    }

    #[test]
    fn identical_event_yields_empty_diff() {
        let mut engine = UpdateEngine::new();
        engine.apply(FieldEvent::new().with(A, num(1)));

        assert!(engine.apply(FieldEvent::new().with(A, num(1))).is_empty());
    }

    #[test]
    fn same_index_in_both_namespaces_is_two_fields() {
        let mut engine = UpdateEngine::new();

        let diff = engine.apply(
            FieldEvent::new()
                .with(FieldId::native(7), num(1))
                .with(FieldId::synthetic(7), num(2)),
        );

        assert_eq!(diff.added.len(), 2);
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn repeated_field_in_one_event_stays_added_with_last_value() {
        let mut engine = UpdateEngine::new();

        let diff = engine.apply(FieldEvent::new().with(A, num(1)).with(A, num(3)));

        assert_eq!(diff.added.get(&A), Some(&num(3)));
        assert!(diff.changed.is_empty());
        assert_eq!(engine.snapshot().get(&A), Some(&num(3)));
    }

    #[test]
    fn field_restored_within_event_is_not_reported() {
        let mut engine = UpdateEngine::new();
        engine.apply(FieldEvent::new().with(A, num(1)).with(B, num(2)));

        let diff = engine.apply(
            FieldEvent::new()
                .with(A, num(5))
                .with(A, num(1))
                .with(B, num(4)),
        );

        assert!(diff.added.is_empty());
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed.get(&B), Some(&num(4)));
        assert_eq!(engine.snapshot().get(&A), Some(&num(1)));
    }

    #[test]
    fn field_changed_twice_within_event_reports_last_value() {
        let mut engine = UpdateEngine::new();
        engine.apply(FieldEvent::new().with(A, num(1)));

        let diff = engine.apply(FieldEvent::new().with(A, num(5)).with(A, num(7)));

        assert_eq!(diff.changed.get(&A), Some(&num(7)));
        assert!(diff.added.is_empty());
    }

    #[test]
    fn kind_change_counts_as_change() {
        let mut engine = UpdateEngine::new();
        engine.apply(FieldEvent::new().with(A, FieldValue::Price(Decimal::ONE)));

        let diff = engine.apply(FieldEvent::new().with(A, FieldValue::Size(Decimal::ONE)));

        assert_eq!(diff.changed.get(&A), Some(&FieldValue::Size(Decimal::ONE)));
    }

    #[test]
    fn replay_reports_whole_snapshot_as_added() {
        let mut engine = UpdateEngine::new();
        engine.apply(FieldEvent::new().with(A, num(1)).with(B, num(2)));

        let replay = engine.replay();

        assert_eq!(replay.added.len(), 2);
        assert!(replay.changed.is_empty());
    }

    #[test]
    fn diff_get_and_iter_cover_both_sets() {
        let mut engine = UpdateEngine::new();
        engine.apply(FieldEvent::new().with(A, num(1)));

        let diff = engine.apply(FieldEvent::new().with(A, num(2)).with(B, num(3)));

        assert_eq!(diff.get(A), Some(&num(2)));
        assert_eq!(diff.get(B), Some(&num(3)));
        assert_eq!(diff.iter().count(), 2);
        assert_eq!(diff.len(), 2);
    }
}
