//! Storage abstraction layer for Porter
//!
//! The transfer worker never touches a filesystem directly: every read,
//! write, stat, mkdir and delete goes through the traits in this crate,
//! keyed by the scheme of the [`Location`] being operated on. That keeps the
//! worker identical across local disks, removable media and network mounts,
//! and lets tests substitute a deterministic in-memory backend.
//!
//! - [`StorageBackend`]: per-scheme capability covering metadata snapshots,
//!   handle creation, create/delete/permission/time operations, directory
//!   iteration and free-space queries
//! - [`FileHandle`]: an open, seekable byte stream bound to one location
//!   and open mode
//! - [`DirIterator`]: streaming iteration over a directory's children
//! - [`StorageRegistry`]: explicitly constructed scheme-to-backend map,
//!   owned by the supervisor and passed by reference (no global factories)
//!
//! Two backends ship with the crate: [`LocalDisk`] for `file://` locations
//! and [`MemoryStorage`], an in-memory tree with scripted fault injection
//! used heavily by the worker's tests.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use porter_types::{FileInfo, Location};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

pub mod local;
pub mod measure;
pub mod memory;

pub use local::LocalDisk;
pub use measure::{measure, SourceSummary};
pub use memory::{FaultOp, MemoryStorage};

/// Mode a file handle is opened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, reads only
    ReadOnly,
    /// Created if absent, truncated to zero length, writes only
    Truncate,
}

/// Free/total byte counts for the storage holding a location
///
/// Snapshots are taken fresh on every [`StorageBackend::storage_info`] call
/// so a re-check after the user frees space observes the new value.
#[derive(Debug, Clone, Copy)]
pub struct StorageInfo {
    /// Bytes currently free
    pub bytes_free: u64,
    /// Total capacity in bytes
    pub bytes_total: u64,
}

/// An open, seekable byte-stream resource bound to one location
///
/// Handles are owned exclusively by the worker step that opened them and are
/// released by drop on every exit path.
pub trait FileHandle: Send {
    /// Read up to `buf.len()` bytes at the current position
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes at the current position, returning how
    /// many were accepted (may be short)
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Reposition the handle to an absolute offset
    fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// Current absolute position
    fn pos(&self) -> u64;

    /// Flush buffered writes to the backend
    fn flush(&mut self) -> io::Result<()>;
}

/// Streaming iteration over the children of a directory
pub trait DirIterator: Send {
    /// Next child snapshot, or `None` when exhausted
    fn next_entry(&mut self) -> io::Result<Option<FileInfo>>;
}

/// Per-scheme storage capability consumed by the transfer worker
pub trait StorageBackend: Send + Sync {
    /// Scheme this backend serves, e.g. `"file"`
    fn scheme(&self) -> &str;

    /// Take a fresh metadata snapshot of a location
    ///
    /// A location that does not exist resolves to an `exists = false`
    /// snapshot with all-zero permissions rather than an error, so callers
    /// can stat prospective destinations and re-check vanished sources.
    fn resolve(&self, location: &Location) -> io::Result<FileInfo>;

    /// Open a byte-stream handle on a location
    fn open(&self, location: &Location, mode: OpenMode) -> io::Result<Box<dyn FileHandle>>;

    /// Create a directory
    fn mkdir(&self, location: &Location) -> io::Result<()>;

    /// Delete a file, symlink, or empty directory
    fn delete(&self, location: &Location) -> io::Result<()>;

    /// Set permission bits
    fn set_permissions(&self, location: &Location, mode: u32) -> io::Result<()>;

    /// Set last-read and last-modified timestamps
    fn set_file_times(
        &self,
        location: &Location,
        last_read: SystemTime,
        last_modified: SystemTime,
    ) -> io::Result<()>;

    /// Iterate the children of a directory
    fn create_dir_iterator(&self, location: &Location) -> io::Result<Box<dyn DirIterator>>;

    /// Fresh free/total space statistics for the storage holding `location`
    fn storage_info(&self, location: &Location) -> io::Result<StorageInfo>;

    /// Target of a symbolic link
    fn read_link(&self, location: &Location) -> io::Result<PathBuf>;

    /// Create a symbolic link at `location` pointing at `target`
    fn create_symlink(&self, location: &Location, target: &Path) -> io::Result<()>;

    /// Best-effort hint that `len` bytes of `location` are about to be read
    ///
    /// Failures are ignorable; the default does nothing.
    fn prefetch(&self, _location: &Location, _len: u64) {}
}

/// Explicit scheme-to-backend map
///
/// Constructed by the supervisor and shared by reference with workers; a
/// missing scheme surfaces through the decision protocol as a handle
/// creation failure, the same as any other open error.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl StorageRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the local-disk backend pre-registered
    pub fn with_local_disk() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalDisk::new()));
        registry
    }

    /// Register a backend under its scheme, replacing any previous one
    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) {
        self.backends.insert(backend.scheme().to_owned(), backend);
    }

    /// Backend serving `location`'s scheme, if registered
    pub fn get(&self, location: &Location) -> Option<Arc<dyn StorageBackend>> {
        self.backends.get(location.scheme()).cloned()
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("schemes", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}
