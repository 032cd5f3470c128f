//! # zonesync Protocol
//!
//! Record model shared by the local store and the remote record store.
//!
//! This crate provides:
//! - [`RecordId`] and [`ZoneId`] identifiers
//! - [`FieldValue`] scalar values (opaque to the sync algorithm)
//! - [`RemoteRecord`] with scalar fields and typed [`Reference`]s
//! - [`RemoteMetadata`], the opaque per-record version blob
//! - [`ChangeToken`], the cursor over a zone's change stream
//! - Push/pull messages ([`PushResult`], [`PullPage`])
//! - [`ConflictPolicy`] and [`ConflictPair`]
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod id;
mod messages;
mod metadata;
mod record;
mod value;

pub use conflict::{ConflictPair, ConflictPolicy};
pub use error::{CodecError, CodecResult};
pub use id::{RecordId, ZoneId};
pub use messages::{PullPage, PushResult};
pub use metadata::{ChangeToken, RemoteMetadata};
pub use record::{Reference, ReferenceAction, RemoteRecord, RemoteValue};
pub use value::FieldValue;

/// Encodes any serializable value as CBOR.
pub fn to_cbor<T: serde::Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a CBOR value produced by [`to_cbor`].
pub fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
