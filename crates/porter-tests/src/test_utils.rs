//! Test utilities: engines over test backends, scripted decision driving,
//! and local tree builders

use porter_engine::{Engine, JobHandle, JobReport};
use porter_types::{Decision, JobEvent, PendingError};
use porter_vfs::{MemoryStorage, StorageRegistry};
use std::path::Path;
use std::sync::Arc;

/// Engine whose registry holds only the given memory backend
pub fn engine_over_memory(storage: &MemoryStorage) -> Engine {
    let mut registry = StorageRegistry::new();
    registry.register(Arc::new(storage.clone()));
    Engine::new(registry)
}

/// Engine over the real local-disk backend
pub fn engine_over_local_disk() -> Engine {
    Engine::new(StorageRegistry::with_local_disk())
}

/// Drive a job to completion, answering each pending error from `decisions`
///
/// Errors beyond the script are answered with Abort. Returns the terminal
/// report together with every pending error that was surfaced.
pub async fn run_with_decisions(
    mut handle: JobHandle,
    decisions: Vec<Decision>,
) -> (JobReport, Vec<PendingError>) {
    let mut events = handle.events().expect("events already taken");
    let mut queue = decisions.into_iter();
    let mut surfaced = Vec::new();

    while let Some(event) = events.recv().await {
        match event {
            JobEvent::NeedsDecision(pending) => {
                surfaced.push(pending);
                handle.set_decision(queue.next().unwrap_or(Decision::Abort));
            }
            JobEvent::Finished { .. } => break,
            _ => {}
        }
    }

    let report = handle.wait().await.expect("job panicked");
    (report, surfaced)
}

/// Create a tree of files under `root`; nested paths get their directories
pub fn build_local_tree(root: &Path, files: &[(&str, Vec<u8>)]) {
    for (relative, data) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, data).expect("write tree file");
    }
}

/// Read a destination tree back as (relative path, contents) pairs, sorted
pub fn read_local_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    collect_files(root, root, &mut entries);
    entries.sort();
    entries
}

fn collect_files(root: &Path, current: &Path, entries: &mut Vec<(String, Vec<u8>)>) {
    for entry in std::fs::read_dir(current).expect("read dir") {
        let path = entry.expect("dir entry").path();
        if path.is_dir() {
            collect_files(root, &path, entries);
        } else {
            let relative = path
                .strip_prefix(root)
                .expect("path under root")
                .to_string_lossy()
                .into_owned();
            entries.push((relative, std::fs::read(&path).expect("read tree file")));
        }
    }
}
