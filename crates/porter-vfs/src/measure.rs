//! Recursive source measurement for progress totals and space checks

use crate::{StorageBackend, StorageRegistry};
use porter_types::{FileKind, Location};
use std::io;

/// Cumulative size and entry count of a set of sources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSummary {
    /// Payload bytes across all regular files
    pub bytes: u64,
    /// Number of entries (files, directories, links)
    pub entries: u64,
}

/// Measure the cumulative size of `sources`, recursing into directories
///
/// Backends are resolved per location, so mixed-scheme source lists work.
/// The walk is metadata-only; it opens no handles.
pub fn measure(registry: &StorageRegistry, sources: &[Location]) -> io::Result<SourceSummary> {
    let mut summary = SourceSummary::default();
    for location in sources {
        let backend = registry.get(location).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no storage backend for scheme '{}'", location.scheme()),
            )
        })?;
        measure_into(backend.as_ref(), location, &mut summary)?;
    }
    Ok(summary)
}

fn measure_into(
    backend: &dyn StorageBackend,
    location: &Location,
    summary: &mut SourceSummary,
) -> io::Result<()> {
    let info = backend.resolve(location)?;
    if !info.exists {
        return Ok(());
    }
    summary.entries += 1;
    if info.kind == FileKind::Directory {
        let mut iter = backend.create_dir_iterator(location)?;
        while let Some(child) = iter.next_entry()? {
            measure_into(backend, &child.location, summary)?;
        }
    } else {
        summary.bytes += info.size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use std::sync::Arc;

    #[test]
    fn test_measure_recurses() {
        let storage = MemoryStorage::new();
        storage.add_dir("/tree");
        storage.add_file("/tree/a", vec![0u8; 100]);
        storage.add_dir("/tree/sub");
        storage.add_file("/tree/sub/b", vec![0u8; 50]);

        let mut registry = StorageRegistry::new();
        registry.register(Arc::new(storage.clone()));

        let summary = measure(&registry, &[storage.location("/tree")]).unwrap();
        assert_eq!(summary.bytes, 150);
        assert_eq!(summary.entries, 4);
    }

    #[test]
    fn test_measure_missing_source_is_empty() {
        let storage = MemoryStorage::new();
        let mut registry = StorageRegistry::new();
        registry.register(Arc::new(storage.clone()));

        let summary = measure(&registry, &[storage.location("/gone")]).unwrap();
        assert_eq!(summary, SourceSummary::default());
    }

    #[test]
    fn test_measure_unknown_scheme_errors() {
        let registry = StorageRegistry::new();
        assert!(measure(&registry, &[Location::new("mtp", "/x")]).is_err());
    }
}
