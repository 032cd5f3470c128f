//! Local records and tombstones.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};
use zonesync_protocol::{FieldValue, RecordId};

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Dirty flag of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChangeType {
    /// In sync with the last applied remote state.
    #[default]
    NoChange,
    /// Mutated locally since the last confirmed remote apply.
    Updated,
}

impl ChangeType {
    /// Converts to a numeric code.
    #[must_use]
    pub fn to_code(&self) -> u8 {
        match self {
            ChangeType::NoChange => 0,
            ChangeType::Updated => 1,
        }
    }

    /// Converts from a numeric code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ChangeType::NoChange),
            1 => Some(ChangeType::Updated),
            _ => None,
        }
    }
}

/// An entity instance in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Stable ID shared with the remote record.
    pub record_id: RecordId,
    /// Entity type name.
    pub entity: String,
    /// Dirty flag.
    pub change_type: ChangeType,
    /// Scalar attributes. `Null` means absent.
    pub fields: BTreeMap<String, FieldValue>,
    /// To-one relationships by name.
    pub to_one: BTreeMap<String, RecordId>,
    /// To-many relationships by name. Never sent to the remote store.
    pub to_many: BTreeMap<String, BTreeSet<RecordId>>,
    /// Time of the last local edit (ms).
    pub modified_at: i64,
    /// Encoded remote metadata, present once the record was synced.
    pub remote_metadata: Option<Vec<u8>>,
}

impl LocalRecord {
    /// Creates an empty, clean record.
    pub fn new(entity: impl Into<String>, record_id: RecordId) -> Self {
        Self {
            record_id,
            entity: entity.into(),
            change_type: ChangeType::NoChange,
            fields: BTreeMap::new(),
            to_one: BTreeMap::new(),
            to_many: BTreeMap::new(),
            modified_at: 0,
            remote_metadata: None,
        }
    }

    /// Sets a scalar field (builder style).
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Links a to-one relationship (builder style).
    #[must_use]
    pub fn with_to_one(mut self, name: impl Into<String>, target: RecordId) -> Self {
        self.to_one.insert(name.into(), target);
        self
    }

    /// Returns a scalar field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns true if the record has local changes to push.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.change_type == ChangeType::Updated
    }

    /// Returns true if the record was synced at least once.
    #[must_use]
    pub fn has_remote_metadata(&self) -> bool {
        self.remote_metadata.is_some()
    }
}

/// Marker for a local delete awaiting a confirmed remote delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// ID of the deleted record.
    pub record_id: RecordId,
}

impl Tombstone {
    /// Creates a tombstone.
    pub fn new(record_id: RecordId) -> Self {
        Self { record_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_type_codes() {
        assert_eq!(ChangeType::from_code(0), Some(ChangeType::NoChange));
        assert_eq!(ChangeType::from_code(1), Some(ChangeType::Updated));
        assert_eq!(ChangeType::from_code(2), None);
        assert_eq!(ChangeType::Updated.to_code(), 1);
    }

    #[test]
    fn new_record_is_clean() {
        let record = LocalRecord::new("Note", RecordId::new("n1")).with_field("title", "hi");
        assert!(!record.is_dirty());
        assert!(!record.has_remote_metadata());
        assert_eq!(record.field("title"), Some(&FieldValue::from("hi")));
    }

    #[test]
    fn clock_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
