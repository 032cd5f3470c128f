//! # zonesync Engine
//!
//! Bidirectional reconciliation between a local object store and a remote
//! record store.
//!
//! This crate provides:
//! - [`SyncOperation`], the pass orchestrator and its [`SyncState`] machine
//! - [`LocalChangeSet`] extraction of dirty records and tombstones
//! - [`RecordTranslator`] between local and remote record shapes
//! - [`ConflictResolver`] for the [`ConflictPolicy`](zonesync_protocol::ConflictPolicy) variants
//! - [`LocalApplier`] for remote-origin changes
//! - [`TokenStore`] persistence of change tokens
//! - The [`RemoteSyncClient`] collaborator trait and an in-memory
//!   [`MemoryRemote`]
//!
//! ## Pass Structure
//!
//! 1. Read dirty records and tombstones
//! 2. Push them; on conflict, resolve and push the resolved records once more
//! 3. Pull every page of remote changes since the stored token
//! 4. Apply push acknowledgements and pulled changes in one local commit
//! 5. Save the new token
//!
//! ## Key Invariants
//!
//! - One resolution cycle per pass; a second conflict fails the pass
//! - The token advances only after the local commit succeeds
//! - Applying the same pull twice leaves the same local state
//! - Nothing is committed locally by a pass that fails or is cancelled

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod change_set;
mod config;
mod error;
mod memory_remote;
mod remote;
mod resolver;
mod state;
mod token;
mod translator;

pub use applier::{ApplyStats, LocalApplier, RemoteChanges};
pub use change_set::LocalChangeSet;
pub use config::{SyncConfig, DEFAULT_PUSH_BATCH_SIZE};
pub use error::{RemoteError, RemoteResult, SyncError, SyncErrorKind, SyncResult};
pub use memory_remote::{MemoryRemote, DEFAULT_PAGE_SIZE};
pub use remote::RemoteSyncClient;
pub use resolver::{fetch_conflict_pairs, ConflictResolver, ResolutionCallback};
pub use state::{SyncOperation, SyncReport, SyncState, SyncStats};
pub use token::{BackendTokenStore, MemoryTokenStore, TokenStore};
pub use translator::{LocalFields, RecordTranslator};
