//! Scheme-qualified locations and file-metadata snapshots

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Scheme used by the local-disk backend
pub const LOCAL_SCHEME: &str = "file";

/// Opaque resource identifier: a scheme plus a path within that scheme
///
/// Locations are value-like and cheap to clone; the storage registry maps
/// the scheme to a backend, the backend interprets the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Location {
    scheme: String,
    path: PathBuf,
}

impl Location {
    /// Create a location from a scheme and a path
    pub fn new(scheme: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            scheme: scheme.into(),
            path: path.into(),
        }
    }

    /// Create a `file://` location on the local disk
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(LOCAL_SCHEME, path)
    }

    /// The scheme the storage registry dispatches on
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The path within the scheme
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A child location inside this one, same scheme
    pub fn join(&self, name: impl AsRef<Path>) -> Self {
        Self {
            scheme: self.scheme.clone(),
            path: self.path.join(name),
        }
    }

    /// Final component of the path, if any
    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.path.display())
    }
}

/// File kind resolved once from metadata and dispatched by pattern match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileKind {
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Anything else (sockets, devices, ...)
    Other,
}

/// Immutable-at-a-point-in-time snapshot of a location's metadata
///
/// Snapshots are taken by `StorageBackend::resolve` and refreshed explicitly
/// after externally-detected changes, e.g. after a read failure to tell
/// "file vanished" apart from "read error".
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileInfo {
    /// Location this snapshot describes
    pub location: Location,
    /// Resolved kind
    pub kind: FileKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Permission bits; all-zero on a snapshot of a vanished file
    pub permissions: u32,
    /// Last read (access) time
    pub last_read: SystemTime,
    /// Last modified time
    pub last_modified: SystemTime,
    /// Whether the location existed when the snapshot was taken
    pub exists: bool,
    /// Number of direct children (directories only)
    pub child_count: u64,
}

impl FileInfo {
    /// Snapshot of a location that does not exist
    pub fn absent(location: Location) -> Self {
        Self {
            location,
            kind: FileKind::Other,
            size: 0,
            permissions: 0,
            last_read: SystemTime::UNIX_EPOCH,
            last_modified: SystemTime::UNIX_EPOCH,
            exists: false,
            child_count: 0,
        }
    }

    /// Whether the snapshot describes a directory
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, FileKind::Directory)
    }

    /// Whether the snapshot describes a regular file
    pub fn is_file(&self) -> bool {
        matches!(self.kind, FileKind::Regular)
    }
}

/// One (source, destination) mapping being processed by a job
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferPair {
    /// Where the data comes from
    pub source: Location,
    /// Where it goes
    pub destination: Location,
}

impl TransferPair {
    /// Create a transfer pair
    pub fn new(source: Location, destination: Location) -> Self {
        Self {
            source,
            destination,
        }
    }
}
