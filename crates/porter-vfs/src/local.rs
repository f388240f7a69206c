//! Local-disk backend serving `file://` locations

use crate::{DirIterator, FileHandle, OpenMode, StorageBackend, StorageInfo};
use filetime::FileTime;
use porter_types::{FileInfo, FileKind, Location, LOCAL_SCHEME};
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Storage backend over the host filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDisk;

impl LocalDisk {
    /// Create the local-disk backend
    pub fn new() -> Self {
        Self
    }
}

fn snapshot(path: &Path) -> io::Result<FileInfo> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(FileInfo::absent(Location::local(path)));
        }
        Err(err) => return Err(err),
    };

    let file_type = metadata.file_type();
    let kind = if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_dir() {
        FileKind::Directory
    } else if file_type.is_file() {
        FileKind::Regular
    } else {
        FileKind::Other
    };

    let child_count = if kind == FileKind::Directory {
        fs::read_dir(path).map(|entries| entries.count() as u64)?
    } else {
        0
    };

    Ok(FileInfo {
        location: Location::local(path),
        kind,
        size: metadata.len(),
        permissions: permission_bits(&metadata),
        last_read: metadata.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
        last_modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        exists: true,
        child_count,
    })
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

struct LocalHandle {
    file: fs::File,
    pos: u64,
}

impl FileHandle for LocalHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

struct LocalDirIterator {
    entries: fs::ReadDir,
}

impl DirIterator for LocalDirIterator {
    fn next_entry(&mut self) -> io::Result<Option<FileInfo>> {
        match self.entries.next() {
            Some(entry) => snapshot(&entry?.path()).map(Some),
            None => Ok(None),
        }
    }
}

impl StorageBackend for LocalDisk {
    fn scheme(&self) -> &str {
        LOCAL_SCHEME
    }

    fn resolve(&self, location: &Location) -> io::Result<FileInfo> {
        snapshot(location.path())
    }

    fn open(&self, location: &Location, mode: OpenMode) -> io::Result<Box<dyn FileHandle>> {
        let file = match mode {
            OpenMode::ReadOnly => fs::File::open(location.path())?,
            OpenMode::Truncate => fs::File::options()
                .write(true)
                .create(true)
                .truncate(true)
                .open(location.path())?,
        };
        debug!("opened {} ({:?})", location, mode);
        Ok(Box::new(LocalHandle { file, pos: 0 }))
    }

    fn mkdir(&self, location: &Location) -> io::Result<()> {
        fs::create_dir(location.path())
    }

    fn delete(&self, location: &Location) -> io::Result<()> {
        let metadata = fs::symlink_metadata(location.path())?;
        if metadata.file_type().is_dir() {
            fs::remove_dir(location.path())
        } else {
            fs::remove_file(location.path())
        }
    }

    fn set_permissions(&self, location: &Location, mode: u32) -> io::Result<()> {
        set_mode(location.path(), mode)
    }

    fn set_file_times(
        &self,
        location: &Location,
        last_read: SystemTime,
        last_modified: SystemTime,
    ) -> io::Result<()> {
        filetime::set_file_times(
            location.path(),
            FileTime::from_system_time(last_read),
            FileTime::from_system_time(last_modified),
        )
    }

    fn create_dir_iterator(&self, location: &Location) -> io::Result<Box<dyn DirIterator>> {
        let entries = fs::read_dir(location.path())?;
        Ok(Box::new(LocalDirIterator { entries }))
    }

    fn storage_info(&self, location: &Location) -> io::Result<StorageInfo> {
        // The location may not exist yet (a prospective destination); the
        // nearest existing ancestor sits on the same filesystem.
        let mut path = location.path();
        loop {
            match free_space(path) {
                Ok(info) => return Ok(info),
                Err(err) => match path.parent() {
                    Some(parent) => path = parent,
                    None => return Err(err),
                },
            }
        }
    }

    fn read_link(&self, location: &Location) -> io::Result<PathBuf> {
        fs::read_link(location.path())
    }

    fn create_symlink(&self, location: &Location, target: &Path) -> io::Result<()> {
        make_symlink(target, location.path())
    }

    fn prefetch(&self, location: &Location, len: u64) {
        read_ahead(location.path(), len);
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlink creation is not supported on this platform",
    ))
}

#[cfg(unix)]
fn free_space(path: &Path) -> io::Result<StorageInfo> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is a valid NUL-terminated string, stats is a zeroed
    // out-parameter of the matching type.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let frsize = stats.f_frsize as u64;
    Ok(StorageInfo {
        bytes_free: stats.f_bavail as u64 * frsize,
        bytes_total: stats.f_blocks as u64 * frsize,
    })
}

#[cfg(not(unix))]
fn free_space(_path: &Path) -> io::Result<StorageInfo> {
    Ok(StorageInfo {
        bytes_free: u64::MAX,
        bytes_total: u64::MAX,
    })
}

#[cfg(target_os = "linux")]
fn read_ahead(path: &Path, len: u64) {
    use std::os::unix::io::AsRawFd;
    if len == 0 {
        return;
    }
    if let Ok(file) = fs::File::open(path) {
        // SAFETY: fd is open for the duration of the call; readahead only
        // schedules page-cache population.
        unsafe {
            libc::readahead(file.as_raw_fd(), 0, len as usize);
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn read_ahead(_path: &Path, _len: u64) {}
