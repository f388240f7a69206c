//! The transfer worker: cancellable copy/move/delete over storage backends
//!
//! One worker executes one job on a dedicated blocking thread. Transfer
//! pairs are processed strictly in submission order; within one file, reads
//! and writes for a block strictly alternate. Every recoverable failure is
//! resolved locally through the decision protocol and never unwinds the
//! call stack; only program errors and explicit Abort decisions terminate
//! the job.

use crate::interaction::Interaction;
use crate::state::StateGate;
use bytes::BytesMut;
use porter_types::{
    Decision, Error, FileInfo, FileKind, JobEvent, JobKind, JobOutcome, Location, PendingError,
    ProgressSnapshot, StepOutcome, TransferPair, TransferStats,
};
use porter_vfs::{
    measure, FileHandle, OpenMode, SourceSummary, StorageBackend, StorageRegistry,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Maximum bytes read or written per I/O call
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Tunables handed to a worker at spawn time
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Block size for the read/write loop
    pub block_size: usize,
    /// Whether to issue the best-effort prefetch hint before copying
    pub enable_prefetch: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            enable_prefetch: true,
        }
    }
}

/// Executes one bulk job against the storage abstraction
pub struct TransferWorker {
    registry: Arc<StorageRegistry>,
    state: Arc<StateGate>,
    interaction: Interaction,
    events: mpsc::UnboundedSender<JobEvent>,
    options: WorkerOptions,
    totals: SourceSummary,
    stats: TransferStats,
    bytes_done: u64,
    entries_done: u64,
}

impl TransferWorker {
    /// Create a worker wired to its supervisor
    pub fn new(
        registry: Arc<StorageRegistry>,
        state: Arc<StateGate>,
        interaction: Interaction,
        events: mpsc::UnboundedSender<JobEvent>,
        options: WorkerOptions,
        totals: SourceSummary,
    ) -> Self {
        Self {
            registry,
            state,
            interaction,
            events,
            options,
            totals,
            stats: TransferStats::new(),
            bytes_done: 0,
            entries_done: 0,
        }
    }

    /// Run the job to a terminal state, consuming the worker
    pub fn run(mut self, kind: JobKind, pairs: Vec<TransferPair>) -> (TransferStats, JobOutcome) {
        let started = Instant::now();
        info!("starting {:?} job, {} pairs", kind, pairs.len());

        let mut outcome = JobOutcome::Completed;

        // Space is checked once against the cumulative pending size, before
        // any destination byte is written.
        if !matches!(kind, JobKind::Delete) && self.totals.bytes > 0 {
            if let Some(first) = pairs.first() {
                match self.check_free_space(&first.source, &first.destination, self.totals.bytes) {
                    StepOutcome::Done => {}
                    StepOutcome::Skipped => {
                        self.stats.files_skipped += pairs.len() as u64;
                        return self.finish(started, JobOutcome::Completed);
                    }
                    StepOutcome::Aborted => return self.finish(started, JobOutcome::Aborted),
                    StepOutcome::Stopped => return self.finish(started, JobOutcome::Cancelled),
                }
            }
        }

        for pair in &pairs {
            if !self.gate() {
                outcome = JobOutcome::Cancelled;
                break;
            }

            let step = self.process_pair(kind, pair);
            match step {
                StepOutcome::Done => self.entries_done += 1,
                StepOutcome::Skipped => {
                    self.stats.files_skipped += 1;
                    self.entries_done += 1;
                }
                StepOutcome::Aborted => {
                    outcome = JobOutcome::Aborted;
                    break;
                }
                StepOutcome::Stopped => {
                    outcome = JobOutcome::Cancelled;
                    break;
                }
            }
        }

        self.finish(started, outcome)
    }

    fn finish(mut self, started: Instant, outcome: JobOutcome) -> (TransferStats, JobOutcome) {
        self.stats.duration = started.elapsed();
        info!(
            "job finished: {:?}, {} copied, {} skipped, {} errors",
            outcome, self.stats.files_copied, self.stats.files_skipped, self.stats.errors
        );
        self.emit(JobEvent::Finished {
            stats: self.stats.clone(),
            outcome,
        });
        (self.stats, outcome)
    }

    fn process_pair(&mut self, kind: JobKind, pair: &TransferPair) -> StepOutcome {
        let source_backend = match self.backend_for(&pair.source, pair) {
            Ok(backend) => backend,
            Err(outcome) => return outcome,
        };

        // Both ends must resolve before any I/O begins; a vanished source is
        // its own error category so the supervisor can tell it apart.
        let info = loop {
            let info = match self.resolve_step(source_backend.as_ref(), &pair.source, pair) {
                Ok(info) => info,
                Err(outcome) => return outcome,
            };
            if info.exists {
                break info;
            }
            let action = self.ask(pair, &pair.source, &Error::nonexistence(pair.source.to_string()));
            if self.state.is_stopped() {
                return StepOutcome::Stopped;
            }
            match action {
                Decision::Retry => continue,
                Decision::Skip => return StepOutcome::Skipped,
                _ => return StepOutcome::Aborted,
            }
        };

        match kind {
            JobKind::Copy => self.copy_entry(&info, &pair.destination, pair),
            JobKind::Move => {
                let copied = self.copy_entry(&info, &pair.destination, pair);
                if copied == StepOutcome::Done {
                    self.delete_entry(&info, pair)
                } else {
                    copied
                }
            }
            JobKind::Delete => self.delete_entry(&info, pair),
        }
    }

    /// Dispatch on the file kind resolved from metadata
    fn copy_entry(&mut self, from: &FileInfo, to: &Location, pair: &TransferPair) -> StepOutcome {
        match from.kind {
            FileKind::Regular => self.copy_file(from, to, pair),
            FileKind::Directory => self.copy_dir(from, to, pair),
            FileKind::Symlink => self.copy_symlink(from, to, pair),
            FileKind::Other => {
                warn!("skipping special file {}", from.location);
                StepOutcome::Skipped
            }
        }
    }

    fn copy_file(&mut self, from: &FileInfo, to: &Location, pair: &TransferPair) -> StepOutcome {
        let source_backend = match self.backend_for(&from.location, pair) {
            Ok(backend) => backend,
            Err(outcome) => return outcome,
        };
        let dest_backend = match self.backend_for(to, pair) {
            Ok(backend) => backend,
            Err(outcome) => return outcome,
        };

        if self.options.enable_prefetch {
            source_backend.prefetch(&from.location, from.size);
        }

        // The destination is opened (and truncated) even for empty sources,
        // so the file exists at the destination afterwards.
        if from.size == 0 {
            match self.open_handle(dest_backend.as_ref(), to, OpenMode::Truncate, pair) {
                Ok(handle) => drop(handle),
                Err(outcome) => return outcome,
            }
            self.apply_source_metadata(dest_backend.as_ref(), from, to);
            self.stats.files_copied += 1;
            self.emit_progress(&from.location, 0, 0);
            debug!("copied empty file {} -> {}", from.location, to);
            return StepOutcome::Done;
        }

        let mut source =
            match self.open_handle(source_backend.as_ref(), &from.location, OpenMode::ReadOnly, pair)
            {
                Ok(handle) => handle,
                Err(outcome) => return outcome,
            };
        let mut dest = match self.open_handle(dest_backend.as_ref(), to, OpenMode::Truncate, pair) {
            Ok(handle) => handle,
            Err(outcome) => return outcome,
        };

        // Buffer sized once per file, released by drop on every exit path.
        let block_size = usize::try_from(from.size.min(self.options.block_size as u64))
            .unwrap_or(self.options.block_size);
        let mut buf = BytesMut::zeroed(block_size);
        let mut copied: u64 = 0;

        let outcome = 'blocks: {
            while copied < from.size {
                let read = match self.read_block(
                    from,
                    source.as_mut(),
                    source_backend.as_ref(),
                    &mut buf,
                    pair,
                ) {
                    Ok(read) => read,
                    Err(outcome) => break 'blocks outcome,
                };
                if read == 0 {
                    break;
                }

                if let Err(outcome) = self.write_block(dest.as_mut(), to, &buf[..read], pair) {
                    break 'blocks outcome;
                }

                copied += read as u64;
                self.bytes_done += read as u64;
                self.stats.bytes_copied += read as u64;
                self.emit_progress(&from.location, copied, from.size);
            }
            StepOutcome::Done
        };

        if outcome != StepOutcome::Done {
            drop(source);
            drop(dest);
            if outcome == StepOutcome::Skipped {
                self.bytes_done += from.size - copied;
                // A skipped entry leaves no partial file behind.
                if let Err(err) = dest_backend.delete(to) {
                    debug!("could not remove partial destination {}: {}", to, err);
                }
            }
            return outcome;
        }

        if let Err(err) = dest.flush() {
            warn!("flush of {} failed: {}", to, err);
        }
        drop(source);
        drop(dest);

        self.apply_source_metadata(dest_backend.as_ref(), from, to);
        if !self.gate() {
            return StepOutcome::Stopped;
        }
        self.stats.files_copied += 1;
        debug!("copied {} -> {} ({} bytes)", from.location, to, copied);
        StepOutcome::Done
    }

    /// Read up to one block, seeking back and retrying on demand
    ///
    /// `Ok(0)` is end of file, only accepted when the handle sits exactly at
    /// the recorded source size; anything else enters the decision protocol.
    fn read_block(
        &mut self,
        from: &FileInfo,
        handle: &mut dyn FileHandle,
        backend: &dyn StorageBackend,
        buf: &mut [u8],
        pair: &TransferPair,
    ) -> Result<usize, StepOutcome> {
        if !self.gate() {
            return Err(StepOutcome::Stopped);
        }
        let resume_pos = handle.pos();

        loop {
            let attempt = handle.read(buf);
            if !self.gate() {
                return Err(StepOutcome::Stopped);
            }

            let cause = match attempt {
                Ok(read) if read > 0 => return Ok(read),
                Ok(_) if handle.pos() == from.size => return Ok(0),
                Ok(_) => "premature end of file".to_owned(),
                Err(err) => err.to_string(),
            };

            // Refresh the snapshot so a vanished source reports as such
            // rather than as a read error.
            let still_exists = backend
                .resolve(&from.location)
                .map(|fresh| fresh.exists)
                .unwrap_or(false);
            let error = if still_exists {
                Error::read(from.location.to_string(), cause)
            } else {
                Error::nonexistence(from.location.to_string())
            };

            let action = self.ask(pair, &from.location, &error);
            if action == Decision::Retry && handle.seek(resume_pos).is_err() {
                let seek_action =
                    self.ask(pair, &from.location, &Error::seek(from.location.to_string()));
                return Err(match seek_action {
                    Decision::Skip => StepOutcome::Skipped,
                    _ => StepOutcome::Aborted,
                });
            }
            if self.state.is_stopped() {
                return Err(StepOutcome::Stopped);
            }
            match action {
                Decision::Retry => continue,
                Decision::Skip => return Err(StepOutcome::Skipped),
                _ => return Err(StepOutcome::Aborted),
            }
        }
    }

    /// Write one block fully, seeking back to the block start on retry
    ///
    /// Partial writes loop internally; a write that errors or accepts no
    /// bytes enters the decision protocol.
    fn write_block(
        &mut self,
        handle: &mut dyn FileHandle,
        to: &Location,
        data: &[u8],
        pair: &TransferPair,
    ) -> Result<(), StepOutcome> {
        if !self.gate() {
            return Err(StepOutcome::Stopped);
        }
        let block_start = handle.pos();

        loop {
            let mut written = 0usize;
            let mut halted = None;
            while written < data.len() {
                match handle.write(&data[written..]) {
                    Ok(0) => {
                        halted = Some("write accepted no bytes".to_owned());
                        break;
                    }
                    Ok(accepted) => written += accepted,
                    Err(err) => {
                        halted = Some(err.to_string());
                        break;
                    }
                }
                if !self.gate() {
                    return Err(StepOutcome::Stopped);
                }
            }
            let Some(cause) = halted else {
                return Ok(());
            };

            let action = self.ask(pair, to, &Error::write(to.to_string(), cause));
            if action == Decision::Retry && handle.seek(block_start).is_err() {
                let seek_action = self.ask(pair, to, &Error::seek(to.to_string()));
                return Err(match seek_action {
                    Decision::Skip => StepOutcome::Skipped,
                    _ => StepOutcome::Aborted,
                });
            }
            if self.state.is_stopped() {
                return Err(StepOutcome::Stopped);
            }
            match action {
                Decision::Retry => continue,
                Decision::Skip => return Err(StepOutcome::Skipped),
                _ => return Err(StepOutcome::Aborted),
            }
        }
    }

    fn copy_dir(&mut self, from: &FileInfo, to: &Location, pair: &TransferPair) -> StepOutcome {
        let source_backend = match self.backend_for(&from.location, pair) {
            Ok(backend) => backend,
            Err(outcome) => return outcome,
        };
        let dest_backend = match self.backend_for(to, pair) {
            Ok(backend) => backend,
            Err(outcome) => return outcome,
        };

        // Captured before recursion so a mutation of the source directory
        // mid-copy is not picked up.
        let permissions = from.permissions;

        let to_info = match self.resolve_step(dest_backend.as_ref(), to, pair) {
            Ok(info) => info,
            Err(outcome) => return outcome,
        };
        if !to_info.exists {
            loop {
                match dest_backend.mkdir(to) {
                    Ok(()) => {
                        self.stats.directories_created += 1;
                        break;
                    }
                    Err(err) => {
                        let action =
                            self.ask(pair, to, &Error::mkdir(to.to_string(), err.to_string()));
                        if self.state.is_stopped() {
                            return StepOutcome::Stopped;
                        }
                        match action {
                            Decision::Retry => continue,
                            Decision::Skip => {
                                // The whole subtree counts as already done
                                // for progress purposes.
                                self.account_subtree_skip(&from.location);
                                return StepOutcome::Skipped;
                            }
                            _ => return StepOutcome::Aborted,
                        }
                    }
                }
            }
        }

        if from.child_count == 0 {
            self.apply_permissions(dest_backend.as_ref(), to, permissions);
            return StepOutcome::Done;
        }

        let mut iter = match source_backend.create_dir_iterator(&from.location) {
            Ok(iter) => iter,
            Err(err) => {
                // Never retryable: surfaced once, fatal to this subtree.
                self.ask(
                    pair,
                    &from.location,
                    &Error::program(format!(
                        "failed to create directory iterator for '{}': {}",
                        from.location, err
                    )),
                );
                return StepOutcome::Aborted;
            }
        };

        loop {
            if !self.gate() {
                return StepOutcome::Stopped;
            }
            let entry = match iter.next_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    self.ask(
                        pair,
                        &from.location,
                        &Error::program(format!(
                            "directory iteration of '{}' failed: {}",
                            from.location, err
                        )),
                    );
                    return StepOutcome::Aborted;
                }
            };
            let Some(name) = entry.location.file_name() else {
                continue;
            };
            let child_dest = to.join(name);

            match self.copy_entry(&entry, &child_dest, pair) {
                StepOutcome::Done => self.entries_done += 1,
                StepOutcome::Skipped => {
                    self.stats.files_skipped += 1;
                    self.entries_done += 1;
                }
                other => return other,
            }
        }

        self.apply_permissions(dest_backend.as_ref(), to, permissions);
        StepOutcome::Done
    }

    fn copy_symlink(&mut self, from: &FileInfo, to: &Location, pair: &TransferPair) -> StepOutcome {
        let source_backend = match self.backend_for(&from.location, pair) {
            Ok(backend) => backend,
            Err(outcome) => return outcome,
        };
        let dest_backend = match self.backend_for(to, pair) {
            Ok(backend) => backend,
            Err(outcome) => return outcome,
        };

        let target = loop {
            match source_backend.read_link(&from.location) {
                Ok(target) => break target,
                Err(err) => {
                    let action = self.ask(
                        pair,
                        &from.location,
                        &Error::io(from.location.to_string(), err.to_string()),
                    );
                    if self.state.is_stopped() {
                        return StepOutcome::Stopped;
                    }
                    match action {
                        Decision::Retry => continue,
                        Decision::Skip => return StepOutcome::Skipped,
                        _ => return StepOutcome::Aborted,
                    }
                }
            }
        };

        loop {
            match dest_backend.create_symlink(to, &target) {
                Ok(()) => {
                    self.stats.files_copied += 1;
                    debug!("linked {} -> {}", to, target.display());
                    return StepOutcome::Done;
                }
                Err(err) => {
                    let action = self.ask(
                        pair,
                        to,
                        &Error::io(
                            to.to_string(),
                            format!("failed to create symlink: {err}"),
                        ),
                    );
                    if self.state.is_stopped() {
                        return StepOutcome::Stopped;
                    }
                    match action {
                        Decision::Retry => continue,
                        Decision::Skip => return StepOutcome::Skipped,
                        _ => return StepOutcome::Aborted,
                    }
                }
            }
        }
    }

    /// Compare the destination's free space against the pending transfer
    ///
    /// Statistics are refreshed on every attempt, so a Retry after the user
    /// freed space observes the new value.
    pub fn check_free_space(
        &mut self,
        from: &Location,
        to: &Location,
        required: u64,
    ) -> StepOutcome {
        let pair = TransferPair::new(from.clone(), to.clone());
        let backend = match self.backend_for(to, &pair) {
            Ok(backend) => backend,
            Err(outcome) => return outcome,
        };

        loop {
            let available = match backend.storage_info(to) {
                Ok(stats) => stats.bytes_free,
                Err(err) => {
                    warn!("free-space query for {} failed: {}", to, err);
                    return StepOutcome::Done;
                }
            };
            if available >= required {
                return StepOutcome::Done;
            }

            let action = self.ask(
                &pair,
                to,
                &Error::NotEnoughSpace {
                    required,
                    available,
                },
            );
            if self.state.is_stopped() {
                return StepOutcome::Stopped;
            }
            match action {
                Decision::Retry => continue,
                Decision::Skip => return StepOutcome::Skipped,
                _ => return StepOutcome::Aborted,
            }
        }
    }

    /// Delete a single entry; Skip counts as handled
    pub fn delete_file(&mut self, info: &FileInfo, pair: &TransferPair) -> bool {
        if !self.gate() {
            return false;
        }
        let backend = match self.backend_for(&info.location, pair) {
            Ok(backend) => backend,
            Err(_) => return false,
        };

        loop {
            match backend.delete(&info.location) {
                Ok(()) => {
                    self.stats.files_deleted += 1;
                    return true;
                }
                Err(err) => {
                    let action = self.ask(
                        pair,
                        &info.location,
                        &Error::delete_file(info.location.to_string(), err.to_string()),
                    );
                    if self.state.is_stopped() {
                        return false;
                    }
                    match action {
                        Decision::Retry => continue,
                        Decision::Skip => {
                            self.stats.files_skipped += 1;
                            return true;
                        }
                        _ => return false,
                    }
                }
            }
        }
    }

    fn delete_entry(&mut self, info: &FileInfo, pair: &TransferPair) -> StepOutcome {
        if info.kind == FileKind::Directory {
            let backend = match self.backend_for(&info.location, pair) {
                Ok(backend) => backend,
                Err(outcome) => return outcome,
            };
            let mut iter = match backend.create_dir_iterator(&info.location) {
                Ok(iter) => iter,
                Err(err) => {
                    self.ask(
                        pair,
                        &info.location,
                        &Error::program(format!(
                            "failed to create directory iterator for '{}': {}",
                            info.location, err
                        )),
                    );
                    return StepOutcome::Aborted;
                }
            };
            loop {
                if !self.gate() {
                    return StepOutcome::Stopped;
                }
                let entry = match iter.next_entry() {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        self.ask(
                            pair,
                            &info.location,
                            &Error::program(format!(
                                "directory iteration of '{}' failed: {}",
                                info.location, err
                            )),
                        );
                        return StepOutcome::Aborted;
                    }
                };
                let outcome = self.delete_entry(&entry, pair);
                if !outcome.continues() {
                    return outcome;
                }
            }
        }

        if self.delete_file(info, pair) {
            StepOutcome::Done
        } else if self.state.is_stopped() {
            StepOutcome::Stopped
        } else {
            StepOutcome::Aborted
        }
    }

    /// Propagate timestamps and permission bits onto a finished destination
    ///
    /// All-zero source permissions mean the source was deleted mid-copy; the
    /// destination's bits are left untouched in that case.
    fn apply_source_metadata(&self, backend: &dyn StorageBackend, from: &FileInfo, to: &Location) {
        if let Err(err) = backend.set_file_times(to, from.last_read, from.last_modified) {
            warn!("failed to set file times on {}: {}", to, err);
        }
        self.apply_permissions(backend, to, from.permissions);
    }

    fn apply_permissions(&self, backend: &dyn StorageBackend, to: &Location, permissions: u32) {
        if permissions == 0 {
            return;
        }
        if let Err(err) = backend.set_permissions(to, permissions) {
            warn!("failed to set permissions on {}: {}", to, err);
        }
    }

    fn open_handle(
        &mut self,
        backend: &dyn StorageBackend,
        target: &Location,
        mode: OpenMode,
        pair: &TransferPair,
    ) -> Result<Box<dyn FileHandle>, StepOutcome> {
        loop {
            match backend.open(target, mode) {
                Ok(handle) => return Ok(handle),
                Err(err) => {
                    let action =
                        self.ask(pair, target, &Error::io(target.to_string(), err.to_string()));
                    if self.state.is_stopped() {
                        return Err(StepOutcome::Stopped);
                    }
                    match action {
                        Decision::Retry => continue,
                        Decision::Skip => return Err(StepOutcome::Skipped),
                        _ => return Err(StepOutcome::Aborted),
                    }
                }
            }
        }
    }

    fn resolve_step(
        &mut self,
        backend: &dyn StorageBackend,
        target: &Location,
        pair: &TransferPair,
    ) -> Result<FileInfo, StepOutcome> {
        loop {
            match backend.resolve(target) {
                Ok(info) => return Ok(info),
                Err(err) => {
                    let action =
                        self.ask(pair, target, &Error::io(target.to_string(), err.to_string()));
                    if self.state.is_stopped() {
                        return Err(StepOutcome::Stopped);
                    }
                    match action {
                        Decision::Retry => continue,
                        Decision::Skip => return Err(StepOutcome::Skipped),
                        _ => return Err(StepOutcome::Aborted),
                    }
                }
            }
        }
    }

    fn backend_for(
        &mut self,
        target: &Location,
        pair: &TransferPair,
    ) -> Result<Arc<dyn StorageBackend>, StepOutcome> {
        loop {
            match self.registry.get(target) {
                Some(backend) => return Ok(backend),
                None => {
                    let action = self.ask(
                        pair,
                        target,
                        &Error::io(
                            target.to_string(),
                            format!("no storage backend for scheme '{}'", target.scheme()),
                        ),
                    );
                    if self.state.is_stopped() {
                        return Err(StepOutcome::Stopped);
                    }
                    match action {
                        Decision::Retry => continue,
                        Decision::Skip => return Err(StepOutcome::Skipped),
                        _ => return Err(StepOutcome::Aborted),
                    }
                }
            }
        }
    }

    /// Surface an error and block for the supervisor's decision
    fn ask(&mut self, pair: &TransferPair, error_location: &Location, error: &Error) -> Decision {
        self.stats.errors += 1;
        self.interaction.report_and_wait(PendingError::new(
            pair.source.clone(),
            pair.destination.clone(),
            error_location.clone(),
            error,
        ))
    }

    fn account_subtree_skip(&mut self, location: &Location) {
        match measure(&self.registry, std::slice::from_ref(location)) {
            Ok(summary) => self.bytes_done += summary.bytes,
            Err(err) => debug!("skip accounting for {} failed: {}", location, err),
        }
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    fn emit_progress(&self, current: &Location, current_bytes: u64, current_size: u64) {
        self.emit(JobEvent::Progress(ProgressSnapshot {
            current: current.clone(),
            current_bytes,
            current_size,
            entries_processed: self.entries_done,
            total_entries: self.totals.entries,
            bytes_processed: self.bytes_done,
            total_bytes: self.totals.bytes,
        }));
    }

    /// State check around blocking calls; false once stopped
    fn gate(&self) -> bool {
        self.state.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::interaction;
    use porter_vfs::{FaultOp, MemoryStorage};

    fn registry_for(storage: &MemoryStorage) -> Arc<StorageRegistry> {
        let mut registry = StorageRegistry::new();
        registry.register(Arc::new(storage.clone()));
        Arc::new(registry)
    }

    fn small_blocks() -> WorkerOptions {
        WorkerOptions {
            block_size: 1024,
            enable_prefetch: false,
        }
    }

    /// Run a job with a scripted list of decisions; unanswered errors abort.
    fn run_job(
        storage: &MemoryStorage,
        kind: JobKind,
        pairs: Vec<TransferPair>,
        decisions: Vec<Decision>,
        options: WorkerOptions,
    ) -> (TransferStats, JobOutcome) {
        let registry = registry_for(storage);
        let gate = Arc::new(StateGate::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (interaction, handle) = interaction(Arc::clone(&gate), events_tx.clone());

        let sources: Vec<Location> = pairs.iter().map(|pair| pair.source.clone()).collect();
        let totals = measure(&registry, &sources).unwrap_or_default();

        let responder = std::thread::spawn(move || {
            let mut queue = decisions.into_iter();
            while let Some(event) = events_rx.blocking_recv() {
                if matches!(event, JobEvent::NeedsDecision(_)) {
                    handle.set_decision(queue.next().unwrap_or(Decision::Abort));
                }
            }
        });

        let worker = TransferWorker::new(registry, gate, interaction, events_tx, options, totals);
        let result = worker.run(kind, pairs);
        responder.join().unwrap();
        result
    }

    #[test]
    fn test_copy_issues_one_cycle_per_block() {
        let storage = MemoryStorage::new();
        let payload: Vec<u8> = (0..2560u32).map(|i| i as u8).collect();
        storage.add_file("/a", payload.clone());

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let (stats, outcome) =
            run_job(&storage, JobKind::Copy, vec![pair], vec![], small_blocks());

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.bytes_copied, 2560);
        assert_eq!(stats.errors, 0);
        assert_eq!(storage.contents("/dst").unwrap(), payload);
        // ceil(2560 / 1024) read/write cycles
        assert_eq!(storage.read_count("/a"), 3);
        assert_eq!(storage.write_count("/dst"), 3);
    }

    #[test]
    fn test_copy_empty_file_creates_destination() {
        let storage = MemoryStorage::new();
        storage.add_file("/empty", Vec::new());

        let pair = TransferPair::new(storage.location("/empty"), storage.location("/dst"));
        let (stats, outcome) =
            run_job(&storage, JobKind::Copy, vec![pair], vec![], small_blocks());

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(stats.files_copied, 1);
        assert_eq!(storage.contents("/dst").unwrap(), Vec::<u8>::new());
        assert_eq!(storage.read_count("/empty"), 0);
    }

    #[test]
    fn test_copy_propagates_permissions_and_times() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", b"payload".to_vec());
        let location = storage.location("/a");
        let backend: &dyn StorageBackend = &storage;
        backend.set_permissions(&location, 0o640).unwrap();
        let times = storage.times_of("/a").unwrap();

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let (_, outcome) = run_job(&storage, JobKind::Copy, vec![pair], vec![], small_blocks());

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(storage.permissions_of("/dst").unwrap(), 0o640);
        assert_eq!(storage.times_of("/dst").unwrap(), times);
    }

    #[test]
    fn test_retry_resumes_at_failed_offset() {
        let storage = MemoryStorage::new();
        let payload: Vec<u8> = (0..4096u32).map(|i| (i / 7) as u8).collect();
        storage.add_file("/a", payload.clone());
        storage.fail_next(FaultOp::Write, "/dst", 1);

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let (stats, outcome) = run_job(
            &storage,
            JobKind::Copy,
            vec![pair],
            vec![Decision::Retry],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(stats.errors, 1);
        // No duplicated or missing bytes after the seek-back retry
        assert_eq!(storage.contents("/dst").unwrap(), payload);
    }

    #[test]
    fn test_partial_writes_loop_until_block_done() {
        let storage = MemoryStorage::new();
        let payload: Vec<u8> = (0..2048u32).map(|i| i as u8).collect();
        storage.add_file("/a", payload.clone());
        storage.cap_writes(100);

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let (stats, outcome) =
            run_job(&storage, JobKind::Copy, vec![pair], vec![], small_blocks());

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(stats.errors, 0);
        assert_eq!(storage.contents("/dst").unwrap(), payload);
    }

    #[test]
    fn test_skip_on_source_open_failure() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", b"data".to_vec());
        storage.fail_next(FaultOp::Open, "/a", 1);

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let (stats, outcome) = run_job(
            &storage,
            JobKind::Copy,
            vec![pair],
            vec![Decision::Skip],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files_copied, 0);
        assert!(!storage.exists("/dst"));
    }

    #[test]
    fn test_skipped_file_leaves_no_partial_destination() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", vec![7u8; 3000]);
        storage.fail_next(FaultOp::Read, "/a", 1);

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let (_, outcome) = run_job(
            &storage,
            JobKind::Copy,
            vec![pair],
            vec![Decision::Skip],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Completed);
        assert!(!storage.exists("/dst"));
    }

    #[test]
    fn test_vanished_source_reports_nonexistence() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", vec![1u8; 2048]);

        let registry = registry_for(&storage);
        let gate = Arc::new(StateGate::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (interaction, handle) = interaction(Arc::clone(&gate), events_tx.clone());

        // First read fails while the file still exists; the responder then
        // removes it and asks for a retry, so the retried read refreshes a
        // vanished snapshot.
        storage.fail_next(FaultOp::Read, "/a", 1);
        let probe = storage.clone();
        let responder = std::thread::spawn(move || {
            let mut kinds = Vec::new();
            while let Some(event) = events_rx.blocking_recv() {
                if let JobEvent::NeedsDecision(pending) = event {
                    kinds.push(pending.kind);
                    if pending.kind == porter_types::ErrorKind::Read {
                        probe.remove_node("/a");
                        handle.set_decision(Decision::Retry);
                    } else {
                        handle.set_decision(Decision::Skip);
                    }
                }
            }
            kinds
        });

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let totals = measure(&registry, &[storage.location("/a")]).unwrap();
        let worker = TransferWorker::new(
            registry,
            gate,
            interaction,
            events_tx,
            small_blocks(),
            totals,
        );
        let (_, outcome) = worker.run(JobKind::Copy, vec![pair]);
        let kinds = responder.join().unwrap();

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(
            kinds,
            vec![
                porter_types::ErrorKind::Read,
                porter_types::ErrorKind::Nonexistence
            ]
        );
    }

    #[test]
    fn test_copy_dir_skip_keeps_siblings() {
        let storage = MemoryStorage::new();
        storage.add_dir("/tree");
        storage.add_file("/tree/a", b"aaa".to_vec());
        storage.add_file("/tree/bad", b"bbb".to_vec());
        storage.add_dir("/tree/sub");
        storage.add_file("/tree/sub/c", b"ccc".to_vec());
        storage.fail_next(FaultOp::Open, "/tree/bad", 1);

        let pair = TransferPair::new(storage.location("/tree"), storage.location("/out"));
        let (stats, outcome) = run_job(
            &storage,
            JobKind::Copy,
            vec![pair],
            vec![Decision::Skip],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(storage.contents("/out/a").unwrap(), b"aaa");
        assert_eq!(storage.contents("/out/sub/c").unwrap(), b"ccc");
        assert!(!storage.exists("/out/bad"));
    }

    #[test]
    fn test_copy_dir_abort_stops_job() {
        let storage = MemoryStorage::new();
        storage.add_dir("/tree");
        storage.add_file("/tree/bad", b"bbb".to_vec());
        storage.fail_next(FaultOp::Open, "/tree/bad", 1);

        let pair = TransferPair::new(storage.location("/tree"), storage.location("/out"));
        let (_, outcome) = run_job(
            &storage,
            JobKind::Copy,
            vec![pair],
            vec![Decision::Abort],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Aborted);
    }

    #[test]
    fn test_dir_iterator_failure_is_fatal_program_error() {
        let storage = MemoryStorage::new();
        storage.add_dir("/tree");
        storage.add_file("/tree/a", b"aaa".to_vec());
        storage.fail_next(FaultOp::DirIterator, "/tree", 1);

        let pair = TransferPair::new(storage.location("/tree"), storage.location("/out"));
        // Even a Retry answer cannot resurrect the subtree
        let (stats, outcome) = run_job(
            &storage,
            JobKind::Copy,
            vec![pair],
            vec![Decision::Retry],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Aborted);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_space_check_gates_before_first_byte() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", vec![0u8; 500]);
        storage.set_space(100, 1000);

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let (stats, outcome) = run_job(
            &storage,
            JobKind::Copy,
            vec![pair],
            vec![Decision::Abort],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Aborted);
        assert_eq!(stats.errors, 1);
        assert!(!storage.exists("/dst"));
        assert_eq!(storage.write_count("/dst"), 0);
    }

    #[test]
    fn test_space_check_retry_after_freeing_space() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", vec![3u8; 500]);
        storage.set_space(100, 1000);

        let registry = registry_for(&storage);
        let gate = Arc::new(StateGate::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (interaction, handle) = interaction(Arc::clone(&gate), events_tx.clone());

        let probe = storage.clone();
        let responder = std::thread::spawn(move || {
            while let Some(event) = events_rx.blocking_recv() {
                if let JobEvent::NeedsDecision(pending) = event {
                    assert_eq!(pending.kind, porter_types::ErrorKind::NotEnoughSpace);
                    probe.set_space(10_000, 10_000);
                    handle.set_decision(Decision::Retry);
                }
            }
        });

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let totals = measure(&registry, &[storage.location("/a")]).unwrap();
        let worker = TransferWorker::new(
            registry,
            gate,
            interaction,
            events_tx,
            small_blocks(),
            totals,
        );
        let (stats, outcome) = worker.run(JobKind::Copy, vec![pair]);
        responder.join().unwrap();

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(stats.files_copied, 1);
        assert_eq!(storage.contents("/dst").unwrap(), vec![3u8; 500]);
    }

    #[test]
    fn test_cancellation_without_decision_protocol() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", vec![9u8; 8 * 1024]);

        let registry = registry_for(&storage);
        let gate = Arc::new(StateGate::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (interaction, _handle) = interaction(Arc::clone(&gate), events_tx.clone());

        // Park the worker at its first gate check, then cancel.
        gate.pause();
        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let totals = measure(&registry, &[storage.location("/a")]).unwrap();
        let worker = TransferWorker::new(
            Arc::clone(&registry),
            Arc::clone(&gate),
            interaction,
            events_tx,
            small_blocks(),
            totals,
        );
        let runner = std::thread::spawn(move || worker.run(JobKind::Copy, vec![pair]));

        std::thread::sleep(std::time::Duration::from_millis(50));
        gate.stop();
        let (_, outcome) = runner.join().unwrap();

        assert_eq!(outcome, JobOutcome::Cancelled);
        let mut asked = false;
        while let Ok(event) = events_rx.try_recv() {
            if matches!(event, JobEvent::NeedsDecision(_)) {
                asked = true;
            }
        }
        assert!(!asked, "cancellation must not enter the decision protocol");
        assert!(!storage.exists("/dst"));
    }

    #[test]
    fn test_cancel_releases_parked_decision_wait() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", vec![9u8; 4 * 1024]);
        storage.fail_next(FaultOp::Read, "/a", 1);

        let registry = registry_for(&storage);
        let gate = Arc::new(StateGate::new());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (interaction, handle) = interaction(Arc::clone(&gate), events_tx.clone());

        // Cancel while the worker is parked on the pending read error, the
        // way JobHandle::cancel does it.
        let cancel_gate = Arc::clone(&gate);
        let responder = std::thread::spawn(move || {
            while let Some(event) = events_rx.blocking_recv() {
                if matches!(event, JobEvent::NeedsDecision(_)) {
                    cancel_gate.stop();
                    handle.set_decision(Decision::Abort);
                }
            }
        });

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let totals = measure(&registry, &[storage.location("/a")]).unwrap();
        let worker = TransferWorker::new(
            registry,
            gate,
            interaction,
            events_tx,
            small_blocks(),
            totals,
        );
        let (_, outcome) = worker.run(JobKind::Copy, vec![pair]);
        responder.join().unwrap();

        // Cancellation takes priority over the Abort answer
        assert_eq!(outcome, JobOutcome::Cancelled);
    }

    #[test]
    fn test_move_deletes_source_after_copy() {
        let storage = MemoryStorage::new();
        storage.add_dir("/tree");
        storage.add_file("/tree/a", b"abc".to_vec());

        let pair = TransferPair::new(storage.location("/tree"), storage.location("/out"));
        let (stats, outcome) =
            run_job(&storage, JobKind::Move, vec![pair], vec![], small_blocks());

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(storage.contents("/out/a").unwrap(), b"abc");
        assert!(!storage.exists("/tree"));
        assert!(!storage.exists("/tree/a"));
        assert_eq!(stats.files_deleted, 2);
    }

    #[test]
    fn test_move_keeps_source_of_skipped_pair() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", b"data".to_vec());
        storage.fail_next(FaultOp::Open, "/a", 1);

        let pair = TransferPair::new(storage.location("/a"), storage.location("/dst"));
        let (_, outcome) = run_job(
            &storage,
            JobKind::Move,
            vec![pair],
            vec![Decision::Skip],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Completed);
        assert!(storage.exists("/a"));
    }

    #[test]
    fn test_delete_retry_then_success() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", b"x".to_vec());
        storage.fail_next(FaultOp::Delete, "/a", 1);

        let pair = TransferPair::new(storage.location("/a"), storage.location("/a"));
        let (stats, outcome) = run_job(
            &storage,
            JobKind::Delete,
            vec![pair],
            vec![Decision::Retry],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(stats.files_deleted, 1);
        assert_eq!(stats.errors, 1);
        assert!(!storage.exists("/a"));
    }

    #[test]
    fn test_delete_skip_counts_as_handled() {
        let storage = MemoryStorage::new();
        storage.add_file("/a", b"x".to_vec());
        storage.add_file("/b", b"y".to_vec());
        storage.fail_next(FaultOp::Delete, "/a", 1);

        let pairs = vec![
            TransferPair::new(storage.location("/a"), storage.location("/a")),
            TransferPair::new(storage.location("/b"), storage.location("/b")),
        ];
        let (stats, outcome) = run_job(
            &storage,
            JobKind::Delete,
            pairs,
            vec![Decision::Skip],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(stats.files_skipped, 1);
        assert!(storage.exists("/a"));
        assert!(!storage.exists("/b"));
    }

    #[test]
    fn test_symlink_is_recreated() {
        let storage = MemoryStorage::new();
        storage.add_dir("/tree");
        storage.add_symlink("/tree/link", "/tree/target");

        let pair = TransferPair::new(storage.location("/tree"), storage.location("/out"));
        let (_, outcome) = run_job(&storage, JobKind::Copy, vec![pair], vec![], small_blocks());

        assert_eq!(outcome, JobOutcome::Completed);
        let backend: &dyn StorageBackend = &storage;
        let target = backend.read_link(&storage.location("/out/link")).unwrap();
        assert_eq!(target, std::path::PathBuf::from("/tree/target"));
    }

    #[test]
    fn test_missing_source_skip() {
        let storage = MemoryStorage::new();

        let pair = TransferPair::new(storage.location("/gone"), storage.location("/dst"));
        let (stats, outcome) = run_job(
            &storage,
            JobKind::Copy,
            vec![pair],
            vec![Decision::Skip],
            small_blocks(),
        );

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(stats.files_skipped, 1);
    }
}
