//! # zonesync Storage
//!
//! Snapshot storage backends for zonesync.
//!
//! A backend holds exactly one opaque byte snapshot. Writers replace the
//! whole snapshot at once, so a reader never observes a half-written state.
//! The local store and the change-token store both persist through this
//! interface; neither backend interprets the bytes it holds.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral replicas
//! - [`FileBackend`] - Durable write-then-rename snapshots guarded by a lock file
//!
//! ## Example
//!
//! ```rust
//! use zonesync_storage::{InMemoryBackend, StorageBackend};
//!
//! let backend = InMemoryBackend::new();
//! assert_eq!(backend.load().unwrap(), None);
//! backend.store(b"snapshot").unwrap();
//! assert_eq!(backend.load().unwrap().as_deref(), Some(&b"snapshot"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
