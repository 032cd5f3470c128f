//! Translation between local records and remote records.

use std::collections::BTreeMap;
use tracing::warn;
use zonesync_protocol::{
    CodecResult, FieldValue, RecordId, Reference, RemoteMetadata, RemoteRecord, ZoneId,
};
use zonesync_store::{EntityDescription, LocalRecord};

/// The local shape of a remote record: scalar fields, to-one targets by
/// relationship name, and the encoded remote metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalFields {
    /// Scalar fields.
    pub fields: BTreeMap<String, FieldValue>,
    /// Referenced record IDs by key.
    pub references: BTreeMap<String, RecordId>,
    /// Encoded [`RemoteMetadata`], if the record carries any.
    pub remote_metadata: Option<Vec<u8>>,
}

/// Converts records between their local and remote representations.
#[derive(Debug, Clone)]
pub struct RecordTranslator<'a> {
    zone: &'a ZoneId,
}

impl<'a> RecordTranslator<'a> {
    /// Creates a translator for records of `zone`.
    pub fn new(zone: &'a ZoneId) -> Self {
        Self { zone }
    }

    /// Builds the remote record to push for `record`.
    ///
    /// Starts from the record's stored remote metadata, so the remote can
    /// detect a stale write. Null fields are left out, which keeps the
    /// server's current value. To-one links become cascading references;
    /// to-many links are never sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored metadata blob cannot be decoded.
    pub fn to_remote(
        &self,
        record: &LocalRecord,
        entity: &EntityDescription,
    ) -> CodecResult<RemoteRecord> {
        let mut remote = match &record.remote_metadata {
            Some(blob) => {
                let metadata = RemoteMetadata::decode(blob)?;
                if &metadata.zone != self.zone {
                    warn!(
                        record_id = %record.record_id,
                        zone = %metadata.zone,
                        "record metadata belongs to another zone"
                    );
                }
                RemoteRecord::with_metadata(record.record_id.clone(), metadata)
            }
            None => RemoteRecord::new(record.record_id.clone(), record.entity.clone()),
        };
        remote.record_type = record.entity.clone();
        remote.modified_at = Some(record.modified_at);

        for (name, value) in &record.fields {
            if !value.is_null() {
                remote.set_field(name.clone(), value.clone());
            }
        }

        for (name, target) in &record.to_one {
            match entity.relationship(name) {
                Some(rel) if !rel.to_many => {
                    remote.set_reference(name.clone(), Reference::cascading(target.clone()));
                }
                _ => warn!(
                    entity = %record.entity,
                    relationship = %name,
                    "skipping undeclared to-one relationship"
                ),
            }
        }

        Ok(remote)
    }

    /// Splits a remote record into local fields and reference targets.
    ///
    /// References are recognized by value type, never by key name.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be encoded.
    pub fn to_local(remote: &RemoteRecord) -> CodecResult<LocalFields> {
        Ok(LocalFields {
            fields: remote
                .fields()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            references: remote
                .references()
                .map(|(name, reference)| (name.clone(), reference.record_id.clone()))
                .collect(),
            remote_metadata: remote.metadata.as_ref().map(RemoteMetadata::encode).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonesync_protocol::{ReferenceAction, RemoteValue};

    fn task_entity() -> EntityDescription {
        EntityDescription::new("Task")
            .with_to_one("list", "List")
            .with_to_many("tags", "Tag")
    }

    #[test]
    fn fresh_record_has_no_metadata() {
        let zone = ZoneId::new("z");
        let mut record = LocalRecord::new("Task", RecordId::new("t1"))
            .with_field("title", "write tests")
            .with_field("notes", FieldValue::Null)
            .with_to_one("list", RecordId::new("l1"));
        record.modified_at = 42;
        record.to_many.insert("tags".into(), [RecordId::new("g1")].into());

        let remote = RecordTranslator::new(&zone)
            .to_remote(&record, &task_entity())
            .unwrap();

        assert!(remote.metadata.is_none());
        assert_eq!(remote.record_type, "Task");
        assert_eq!(remote.modified_at, Some(42));
        assert_eq!(remote.field("title"), Some(&FieldValue::from("write tests")));
        assert!(!remote.values.contains_key("notes"));
        assert!(!remote.values.contains_key("tags"));

        let list = remote.reference("list").unwrap();
        assert_eq!(list.record_id, RecordId::new("l1"));
        assert_eq!(list.action, ReferenceAction::DeleteSelf);
    }

    #[test]
    fn stored_metadata_is_carried() {
        let zone = ZoneId::new("z");
        let metadata = RemoteMetadata::new("z", "Task", "tag-1", 1, 2);
        let mut record = LocalRecord::new("Task", RecordId::new("t1"));
        record.remote_metadata = Some(metadata.encode().unwrap());

        let remote = RecordTranslator::new(&zone)
            .to_remote(&record, &task_entity())
            .unwrap();
        assert_eq!(remote.change_tag(), Some("tag-1"));
        assert_eq!(remote.modified_at, Some(record.modified_at));
    }

    #[test]
    fn corrupt_metadata_fails() {
        let zone = ZoneId::new("z");
        let mut record = LocalRecord::new("Task", RecordId::new("t1"));
        record.remote_metadata = Some(vec![0xff]);
        assert!(RecordTranslator::new(&zone)
            .to_remote(&record, &task_entity())
            .is_err());
    }

    #[test]
    fn undeclared_links_are_skipped() {
        let zone = ZoneId::new("z");
        let record =
            LocalRecord::new("Task", RecordId::new("t1")).with_to_one("owner", RecordId::new("p"));
        let remote = RecordTranslator::new(&zone)
            .to_remote(&record, &task_entity())
            .unwrap();
        assert!(remote.references().next().is_none());
    }

    #[test]
    fn to_local_separates_by_type() {
        let mut remote = RemoteRecord::with_metadata(
            RecordId::new("t1"),
            RemoteMetadata::new("z", "Task", "tag", 1, 2),
        );
        remote.set_field("title", "a");
        // A field whose name looks like a relationship is still a field
        remote.set_field("list", "not a link");
        remote.set_reference("parent", Reference::cascading(RecordId::new("t0")));

        let local = RecordTranslator::to_local(&remote).unwrap();
        assert_eq!(local.fields.len(), 2);
        assert_eq!(local.references.get("parent"), Some(&RecordId::new("t0")));
        assert!(matches!(
            remote.values.get("list"),
            Some(RemoteValue::Field(_))
        ));
        let metadata = RemoteMetadata::decode(local.remote_metadata.as_deref().unwrap()).unwrap();
        assert_eq!(metadata.change_tag, "tag");
    }
}
