//! File-based snapshot backend.
//!
//! Layout next to the snapshot path `<path>`:
//!
//! ```text
//! <path>        # current snapshot
//! <path>.tmp    # in-flight write, renamed over <path> on success
//! <path>.lock   # advisory lock held for the lifetime of the backend
//! ```

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// A durable snapshot backend using write-then-rename.
///
/// Opening the backend takes an exclusive advisory lock, so only one
/// process can own a given snapshot (and therefore run sync passes against
/// the store it holds) at a time.
///
/// # Example
///
/// ```no_run
/// use zonesync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("replica/state.cbor")).unwrap();
/// backend.store(b"snapshot").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    temp_path: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileBackend {
    /// Opens a snapshot backend at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process holds the lock, or an I/O error.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = sibling(path, "lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: path.display().to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            temp_path: sibling(path, "tmp"),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn sync_parent(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> StorageResult<()> {
        // NTFS journals the rename
        Ok(())
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

impl StorageBackend for FileBackend {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    fn store(&self, data: &[u8]) -> StorageResult<()> {
        let _guard = self.write_lock.lock();

        let mut file = File::create(&self.temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;
        self.sync_parent()
    }

    fn clear(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => self.sync_parent(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_snapshot_loads_none() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("state.cbor")).unwrap();
        assert_eq!(backend.load().unwrap(), None);
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.cbor");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.store(b"durable").unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.load().unwrap(), Some(b"durable".to_vec()));
        assert!(!sibling(&path, "tmp").exists());
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.cbor");

        let _first = FileBackend::open(&path).unwrap();
        let second = FileBackend::open(&path);
        assert!(matches!(second, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("state.cbor")).unwrap();
        backend.store(b"x").unwrap();
        backend.clear().unwrap();
        backend.clear().unwrap();
        assert_eq!(backend.load().unwrap(), None);
    }
}
