//! Job requests submitted to the engine

use porter_fileops::WorkerOptions;
use porter_types::{JobKind, Location, TransferPair};

/// Everything needed to run one bulk job
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Class of operation
    pub kind: JobKind,
    /// Ordered transfer pairs; processed strictly in this order
    pub pairs: Vec<TransferPair>,
    /// Worker tunables
    pub options: WorkerOptions,
}

impl JobRequest {
    /// Create a request with default worker options
    pub fn new(kind: JobKind, pairs: Vec<TransferPair>) -> Self {
        Self {
            kind,
            pairs,
            options: WorkerOptions::default(),
        }
    }

    /// Copy each pair's source to its destination
    pub fn copy(pairs: Vec<TransferPair>) -> Self {
        Self::new(JobKind::Copy, pairs)
    }

    /// Copy each pair, then delete the sources of completed pairs
    pub fn move_(pairs: Vec<TransferPair>) -> Self {
        Self::new(JobKind::Move, pairs)
    }

    /// Delete the targets, recursing into directories
    ///
    /// Delete jobs carry no distinct destination; events echo the target in
    /// both positions.
    pub fn delete(targets: Vec<Location>) -> Self {
        let pairs = targets
            .into_iter()
            .map(|target| TransferPair::new(target.clone(), target))
            .collect();
        Self::new(JobKind::Delete, pairs)
    }

    /// Override the worker tunables
    pub fn with_options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply worker tunables from the application configuration
    pub fn with_config(self, config: &porter_config::Config) -> Self {
        self.with_options(WorkerOptions {
            block_size: config.io.block_size.get(),
            enable_prefetch: config.io.enable_prefetch,
        })
    }
}
