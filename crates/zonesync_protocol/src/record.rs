//! Remote record representation.

use crate::id::RecordId;
use crate::metadata::RemoteMetadata;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the remote store does to a referencing record when its target is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceAction {
    /// The reference is left dangling.
    None,
    /// The referencing record is deleted together with its target.
    DeleteSelf,
}

/// A typed pointer from one remote record to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Target record.
    pub record_id: RecordId,
    /// Behavior on target delete.
    pub action: ReferenceAction,
}

impl Reference {
    /// Creates a reference that cascades deletes from its target.
    pub fn cascading(record_id: RecordId) -> Self {
        Self {
            record_id,
            action: ReferenceAction::DeleteSelf,
        }
    }
}

/// A value stored under a key of a remote record.
///
/// Relationship keys are told apart from scalar keys by the variant, never
/// by the key name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteValue {
    /// Scalar attribute.
    Field(FieldValue),
    /// Relationship to another record.
    Reference(Reference),
}

/// A record as the remote store sees it.
///
/// Produced from a local record for push, or received from the remote
/// store on pull and conflict fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Stable record ID.
    pub record_id: RecordId,
    /// Entity type name.
    pub record_type: String,
    /// Scalar fields and references by key.
    pub values: BTreeMap<String, RemoteValue>,
    /// Modification time in milliseconds (client edit time on push, server
    /// save time on records returned by the remote).
    pub modified_at: Option<i64>,
    /// Last-known remote system state; `None` for a record never saved remotely.
    pub metadata: Option<RemoteMetadata>,
}

impl RemoteRecord {
    /// Creates an empty record with no remote metadata.
    pub fn new(record_id: RecordId, record_type: impl Into<String>) -> Self {
        Self {
            record_id,
            record_type: record_type.into(),
            values: BTreeMap::new(),
            modified_at: None,
            metadata: None,
        }
    }

    /// Creates an empty record carrying existing remote metadata.
    pub fn with_metadata(record_id: RecordId, metadata: RemoteMetadata) -> Self {
        Self {
            record_id,
            record_type: metadata.record_type.clone(),
            values: BTreeMap::new(),
            modified_at: Some(metadata.modified_at),
            metadata: Some(metadata),
        }
    }

    /// Sets a scalar field.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.values
            .insert(key.into(), RemoteValue::Field(value.into()));
    }

    /// Sets a reference.
    pub fn set_reference(&mut self, key: impl Into<String>, reference: Reference) {
        self.values
            .insert(key.into(), RemoteValue::Reference(reference));
    }

    /// Returns the scalar value under `key`, if it is a field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        match self.values.get(key) {
            Some(RemoteValue::Field(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns the reference under `key`, if it is one.
    #[must_use]
    pub fn reference(&self, key: &str) -> Option<&Reference> {
        match self.values.get(key) {
            Some(RemoteValue::Reference(reference)) => Some(reference),
            _ => None,
        }
    }

    /// Iterates scalar fields.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.values.iter().filter_map(|(k, v)| match v {
            RemoteValue::Field(value) => Some((k, value)),
            RemoteValue::Reference(_) => None,
        })
    }

    /// Iterates references.
    pub fn references(&self) -> impl Iterator<Item = (&String, &Reference)> {
        self.values.iter().filter_map(|(k, v)| match v {
            RemoteValue::Reference(reference) => Some((k, reference)),
            RemoteValue::Field(_) => None,
        })
    }

    /// Returns the change tag of the last-known remote version.
    #[must_use]
    pub fn change_tag(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.change_tag.as_str())
    }
}
