//! # zonesync Store
//!
//! The local persistent object store the sync engine reconciles.
//!
//! This crate provides:
//! - [`LocalRecord`] with flag-based dirty tracking ([`ChangeType`])
//! - [`Tombstone`]s for local deletes awaiting a confirmed remote delete
//! - An entity [`Catalog`] describing to-one / to-many relationships
//! - The [`LocalStore`] collaborator trait
//! - [`WriteBatch`], the unit of atomic multi-record commit
//! - [`MemoryStore`], optionally persisted through a storage backend
//!
//! ## Key Invariants
//!
//! - A batch commits entirely or not at all
//! - Local mutations mark records `Updated`; only the sync engine clears the flag
//! - A guarded put never overwrites a record that changed after it was read
//! - Deleting a record locally leaves a tombstone until the delete is pushed

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod error;
mod memory;
mod record;
mod schema;
mod store;

pub use batch::{OnChanged, PendingWrite, PutGuard, WriteBatch};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use record::{now_millis, ChangeType, LocalRecord, Tombstone};
pub use schema::{Catalog, EntityDescription, RelationshipDescription};
pub use store::{CommitStats, LocalStore};
