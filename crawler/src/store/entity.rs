//! The typed-hash-record contract: a key prefix, a field table with one
//! class per field, and encode/decode hooks the store drives generically.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::codec::{CodecError, FieldKind, FieldValue};

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Bookkeeping shared by every record: whether the row existed in the store,
/// which fields were mutated since the last persist, and the timestamp the
/// store returned for the last commit.
#[derive(Debug, Clone, Default)]
pub struct RecordState {
    pub existed: bool,
    changes: BTreeSet<&'static str>,
}

impl RecordState {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn is_changed(&self, field: &str) -> bool {
        self.changes.contains(field)
    }

    pub fn set_change(&mut self, fields: &[&'static str]) {
        self.changes.extend(fields);
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        self.changes.iter().copied().collect()
    }

    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }
}

pub trait Entity: Sized + Send {
    const PREFIX: &'static str;

    fn field_specs() -> &'static [FieldSpec];

    /// Fresh record with defaults; `name` is case-folded to lowercase.
    fn with_name(name: &str) -> Self;

    fn name(&self) -> &str;

    fn state(&self) -> &RecordState;

    fn state_mut(&mut self) -> &mut RecordState;

    /// Encode one field for storage; `None` when the field is unset. An
    /// unknown field name is a programming error and panics.
    fn capture(&self, field: &str) -> Option<FieldValue>;

    /// Decode one stored field into the record. An unknown field name is a
    /// programming error and panics.
    fn apply(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError>;

    fn updated(&self) -> Option<DateTime<Utc>>;

    fn set_updated(&mut self, at: DateTime<Utc>);
}

/// Look up the spec for a field, panicking on unknown names.
pub fn field_spec<E: Entity>(field: &str) -> FieldSpec {
    E::field_specs()
        .iter()
        .copied()
        .find(|spec| spec.name == field)
        .unwrap_or_else(|| panic!("unknown field \"{field}\" for prefix \"{}\"", E::PREFIX))
}
