//! Remote system state: per-record metadata and zone change tokens.

use crate::error::CodecResult;
use crate::id::ZoneId;
use crate::{from_cbor, to_cbor};
use serde::{Deserialize, Serialize};

/// Remote-side system fields of a record.
///
/// The local store keeps this as an opaque blob ([`encode`](Self::encode)),
/// and hands it back on the next push so the remote store can tell whether
/// the record moved since the client last saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    /// Zone holding the record.
    pub zone: ZoneId,
    /// Entity type name.
    pub record_type: String,
    /// Version tag; changes on every remote save.
    pub change_tag: String,
    /// Remote creation time (ms).
    pub created_at: i64,
    /// Remote modification time (ms).
    pub modified_at: i64,
}

impl RemoteMetadata {
    /// Creates metadata.
    pub fn new(
        zone: impl Into<ZoneId>,
        record_type: impl Into<String>,
        change_tag: impl Into<String>,
        created_at: i64,
        modified_at: i64,
    ) -> Self {
        Self {
            zone: zone.into(),
            record_type: record_type.into(),
            change_tag: change_tag.into(),
            created_at,
            modified_at,
        }
    }

    /// Encodes to the opaque blob stored on local records.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes a blob produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

/// Opaque cursor over a zone's remote change stream.
///
/// Only the remote store interprets the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    /// Wraps raw token bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;

    #[test]
    fn metadata_blob_roundtrip() {
        let metadata = RemoteMetadata::new("notes", "Note", "a1b2", 1_000, 2_000);
        let blob = metadata.encode().unwrap();
        assert_eq!(RemoteMetadata::decode(&blob).unwrap(), metadata);
    }

    #[test]
    fn corrupt_blob_is_rejected() {
        let err = RemoteMetadata::decode(&[0xFF, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { .. }));
    }
}
