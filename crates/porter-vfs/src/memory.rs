//! In-memory storage backend with scripted fault injection
//!
//! Used by the worker and engine tests to exercise the decision protocol
//! deterministically: failures can be queued per path and operation, write
//! calls can be capped to force partial-write handling, and read/write call
//! counts are recorded for cycle-count assertions.

use crate::{DirIterator, FileHandle, OpenMode, StorageBackend, StorageInfo};
use porter_types::{FileInfo, FileKind, Location};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

const DEFAULT_SPACE: u64 = 1 << 40;

#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        permissions: u32,
        last_read: SystemTime,
        last_modified: SystemTime,
    },
    Dir {
        permissions: u32,
    },
    Symlink {
        target: PathBuf,
    },
}

/// Operations a fault can be scripted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    /// Fail `FileHandle::read`
    Read,
    /// Fail `FileHandle::write`
    Write,
    /// Fail `StorageBackend::open`
    Open,
    /// Fail `StorageBackend::mkdir`
    Mkdir,
    /// Fail `StorageBackend::delete`
    Delete,
    /// Fail `StorageBackend::create_dir_iterator`
    DirIterator,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<PathBuf, Node>,
    faults: HashMap<(FaultOp, PathBuf), u32>,
    reads: HashMap<PathBuf, u64>,
    writes: HashMap<PathBuf, u64>,
    write_cap: Option<usize>,
    bytes_free: u64,
    bytes_total: u64,
}

impl State {
    fn take_fault(&mut self, op: FaultOp, path: &Path) -> bool {
        let key = (op, path.to_path_buf());
        match self.faults.get_mut(&key) {
            Some(remaining) => {
                *remaining -= 1;
                if *remaining == 0 {
                    self.faults.remove(&key);
                }
                true
            }
            None => false,
        }
    }

    fn child_count(&self, path: &Path) -> u64 {
        self.nodes
            .keys()
            .filter(|candidate| candidate.parent() == Some(path))
            .count() as u64
    }
}

/// In-memory tree of files, directories and symlinks
///
/// Cloning shares the underlying tree, so a test can keep one clone for
/// scripting faults and assertions while the registry owns another.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    scheme: String,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create an empty tree under the `mem` scheme
    pub fn new() -> Self {
        Self::with_scheme("mem")
    }

    /// Create an empty tree under a custom scheme
    pub fn with_scheme(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            state: Arc::new(Mutex::new(State {
                bytes_free: DEFAULT_SPACE,
                bytes_total: DEFAULT_SPACE,
                ..State::default()
            })),
        }
    }

    /// Location for a path under this backend's scheme
    pub fn location(&self, path: impl Into<PathBuf>) -> Location {
        Location::new(self.scheme.clone(), path)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert a regular file with default permissions
    pub fn add_file(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.lock().nodes.insert(
            path.into(),
            Node::File {
                data: data.into(),
                permissions: 0o644,
                last_read: SystemTime::now(),
                last_modified: SystemTime::now(),
            },
        );
    }

    /// Insert a directory
    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        self.lock()
            .nodes
            .insert(path.into(), Node::Dir { permissions: 0o755 });
    }

    /// Insert a symlink
    pub fn add_symlink(&self, path: impl Into<PathBuf>, target: impl Into<PathBuf>) {
        self.lock().nodes.insert(
            path.into(),
            Node::Symlink {
                target: target.into(),
            },
        );
    }

    /// Script the next `count` calls of `op` against `path` to fail
    pub fn fail_next(&self, op: FaultOp, path: impl Into<PathBuf>, count: u32) {
        if count > 0 {
            self.lock().faults.insert((op, path.into()), count);
        }
    }

    /// Cap the number of bytes any single write call accepts
    pub fn cap_writes(&self, cap: usize) {
        self.lock().write_cap = Some(cap);
    }

    /// Set the free/total space reported by `storage_info`
    pub fn set_space(&self, bytes_free: u64, bytes_total: u64) {
        let mut state = self.lock();
        state.bytes_free = bytes_free;
        state.bytes_total = bytes_total;
    }

    /// Number of read calls issued against `path`
    pub fn read_count(&self, path: impl AsRef<Path>) -> u64 {
        self.lock().reads.get(path.as_ref()).copied().unwrap_or(0)
    }

    /// Number of write calls issued against `path`
    pub fn write_count(&self, path: impl AsRef<Path>) -> u64 {
        self.lock().writes.get(path.as_ref()).copied().unwrap_or(0)
    }

    /// Current contents of a file, if it exists
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.lock().nodes.get(path.as_ref()) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Permission bits of a node, if it exists
    pub fn permissions_of(&self, path: impl AsRef<Path>) -> Option<u32> {
        match self.lock().nodes.get(path.as_ref()) {
            Some(Node::File { permissions, .. }) | Some(Node::Dir { permissions }) => {
                Some(*permissions)
            }
            _ => None,
        }
    }

    /// Timestamps of a file, if it exists
    pub fn times_of(&self, path: impl AsRef<Path>) -> Option<(SystemTime, SystemTime)> {
        match self.lock().nodes.get(path.as_ref()) {
            Some(Node::File {
                last_read,
                last_modified,
                ..
            }) => Some((*last_read, *last_modified)),
            _ => None,
        }
    }

    /// Whether any node exists at `path`
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.lock().nodes.contains_key(path.as_ref())
    }

    /// Remove a node outright, bypassing the backend contract
    ///
    /// Lets tests make a source vanish mid-copy.
    pub fn remove_node(&self, path: impl AsRef<Path>) {
        self.lock().nodes.remove(path.as_ref());
    }
}

fn injected(op: &str) -> io::Error {
    io::Error::other(format!("injected {op} failure"))
}

struct MemoryHandle {
    state: Arc<Mutex<State>>,
    path: PathBuf,
    pos: u64,
}

impl MemoryHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl FileHandle for MemoryHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        *state.reads.entry(self.path.clone()).or_insert(0) += 1;
        if state.take_fault(FaultOp::Read, &self.path) {
            return Err(injected("read"));
        }
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX);
        let n = match state.nodes.get(&self.path) {
            Some(Node::File { data, .. }) => {
                if start >= data.len() {
                    0
                } else {
                    let n = buf.len().min(data.len() - start);
                    buf[..n].copy_from_slice(&data[start..start + n]);
                    n
                }
            }
            _ => return Err(io::Error::new(io::ErrorKind::NotFound, "file vanished")),
        };
        drop(state);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        *state.writes.entry(self.path.clone()).or_insert(0) += 1;
        if state.take_fault(FaultOp::Write, &self.path) {
            return Err(injected("write"));
        }
        let cap = state.write_cap.unwrap_or(usize::MAX);
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX);
        let n = match state.nodes.get_mut(&self.path) {
            Some(Node::File { data, .. }) => {
                let n = buf.len().min(cap);
                if data.len() < start + n {
                    data.resize(start + n, 0);
                }
                data[start..start + n].copy_from_slice(&buf[..n]);
                n
            }
            _ => return Err(io::Error::new(io::ErrorKind::NotFound, "file vanished")),
        };
        drop(state);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MemoryDirIterator {
    entries: std::vec::IntoIter<FileInfo>,
}

impl DirIterator for MemoryDirIterator {
    fn next_entry(&mut self) -> io::Result<Option<FileInfo>> {
        Ok(self.entries.next())
    }
}

impl MemoryStorage {
    fn snapshot_locked(&self, state: &State, path: &Path) -> FileInfo {
        let location = self.location(path);
        match state.nodes.get(path) {
            Some(Node::File {
                data,
                permissions,
                last_read,
                last_modified,
            }) => FileInfo {
                location,
                kind: FileKind::Regular,
                size: data.len() as u64,
                permissions: *permissions,
                last_read: *last_read,
                last_modified: *last_modified,
                exists: true,
                child_count: 0,
            },
            Some(Node::Dir { permissions }) => FileInfo {
                location,
                kind: FileKind::Directory,
                size: 0,
                permissions: *permissions,
                last_read: SystemTime::UNIX_EPOCH,
                last_modified: SystemTime::UNIX_EPOCH,
                exists: true,
                child_count: state.child_count(path),
            },
            Some(Node::Symlink { .. }) => FileInfo {
                location,
                kind: FileKind::Symlink,
                size: 0,
                permissions: 0o777,
                last_read: SystemTime::UNIX_EPOCH,
                last_modified: SystemTime::UNIX_EPOCH,
                exists: true,
                child_count: 0,
            },
            None => FileInfo::absent(location),
        }
    }
}

impl StorageBackend for MemoryStorage {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn resolve(&self, location: &Location) -> io::Result<FileInfo> {
        let state = self.lock();
        Ok(self.snapshot_locked(&state, location.path()))
    }

    fn open(&self, location: &Location, mode: OpenMode) -> io::Result<Box<dyn FileHandle>> {
        let path = location.path().to_path_buf();
        let mut state = self.lock();
        if state.take_fault(FaultOp::Open, &path) {
            return Err(injected("open"));
        }
        match mode {
            OpenMode::ReadOnly => match state.nodes.get(&path) {
                Some(Node::File { .. }) => {}
                Some(_) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a file"));
                }
                None => {
                    return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
                }
            },
            OpenMode::Truncate => match state.nodes.entry(path.clone()) {
                Entry::Occupied(mut occupied) => match occupied.get_mut() {
                    Node::File { data, .. } => data.clear(),
                    _ => {
                        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a file"));
                    }
                },
                Entry::Vacant(vacant) => {
                    vacant.insert(Node::File {
                        data: Vec::new(),
                        permissions: 0o644,
                        last_read: SystemTime::now(),
                        last_modified: SystemTime::now(),
                    });
                }
            },
        }
        Ok(Box::new(MemoryHandle {
            state: Arc::clone(&self.state),
            path,
            pos: 0,
        }))
    }

    fn mkdir(&self, location: &Location) -> io::Result<()> {
        let mut state = self.lock();
        if state.take_fault(FaultOp::Mkdir, location.path()) {
            return Err(injected("mkdir"));
        }
        if state.nodes.contains_key(location.path()) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "directory exists",
            ));
        }
        state
            .nodes
            .insert(location.path().to_path_buf(), Node::Dir { permissions: 0o755 });
        Ok(())
    }

    fn delete(&self, location: &Location) -> io::Result<()> {
        let mut state = self.lock();
        if state.take_fault(FaultOp::Delete, location.path()) {
            return Err(injected("delete"));
        }
        let is_dir = match state.nodes.get(location.path()) {
            Some(Node::Dir { .. }) => true,
            Some(_) => false,
            None => return Err(io::Error::new(io::ErrorKind::NotFound, "no such node")),
        };
        if is_dir && state.child_count(location.path()) > 0 {
            return Err(io::Error::other("directory not empty"));
        }
        state.nodes.remove(location.path());
        Ok(())
    }

    fn set_permissions(&self, location: &Location, mode: u32) -> io::Result<()> {
        let mut state = self.lock();
        match state.nodes.get_mut(location.path()) {
            Some(Node::File { permissions, .. }) | Some(Node::Dir { permissions }) => {
                *permissions = mode;
                Ok(())
            }
            Some(Node::Symlink { .. }) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such node")),
        }
    }

    fn set_file_times(
        &self,
        location: &Location,
        last_read: SystemTime,
        last_modified: SystemTime,
    ) -> io::Result<()> {
        let mut state = self.lock();
        match state.nodes.get_mut(location.path()) {
            Some(Node::File {
                last_read: read_slot,
                last_modified: modified_slot,
                ..
            }) => {
                *read_slot = last_read;
                *modified_slot = last_modified;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such node")),
        }
    }

    fn create_dir_iterator(&self, location: &Location) -> io::Result<Box<dyn DirIterator>> {
        let path = location.path();
        let mut state = self.lock();
        if state.take_fault(FaultOp::DirIterator, path) {
            return Err(injected("directory iterator"));
        }
        if !matches!(state.nodes.get(path), Some(Node::Dir { .. })) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not a directory"));
        }
        let mut children: Vec<PathBuf> = state
            .nodes
            .keys()
            .filter(|candidate| candidate.parent() == Some(path))
            .cloned()
            .collect();
        children.sort();
        let entries: Vec<FileInfo> = children
            .iter()
            .map(|child| self.snapshot_locked(&state, child))
            .collect();
        Ok(Box::new(MemoryDirIterator {
            entries: entries.into_iter(),
        }))
    }

    fn storage_info(&self, _location: &Location) -> io::Result<StorageInfo> {
        let state = self.lock();
        Ok(StorageInfo {
            bytes_free: state.bytes_free,
            bytes_total: state.bytes_total,
        })
    }

    fn read_link(&self, location: &Location) -> io::Result<PathBuf> {
        match self.lock().nodes.get(location.path()) {
            Some(Node::Symlink { target }) => Ok(target.clone()),
            Some(_) => Err(io::Error::new(io::ErrorKind::InvalidInput, "not a symlink")),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such node")),
        }
    }

    fn create_symlink(&self, location: &Location, target: &Path) -> io::Result<()> {
        self.lock().nodes.insert(
            location.path().to_path_buf(),
            Node::Symlink {
                target: target.to_path_buf(),
            },
        );
        Ok(())
    }
}
