//! Engine and job handles

use crate::job::JobRequest;
use porter_fileops::{interaction, InteractionHandle, StateGate, TransferWorker};
use porter_types::{
    Decision, Error, JobEvent, JobId, JobKind, JobOutcome, Location, OpState, Result,
    TransferStats,
};
use porter_vfs::{measure, SourceSummary, StorageRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Terminal report of a finished job
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Aggregate accounting
    pub stats: TransferStats,
    /// How the job ended
    pub outcome: JobOutcome,
}

/// Supervisor owning the storage registry and spawning workers
///
/// One engine serves the whole application; each submitted job gets its own
/// worker on a dedicated blocking thread and its own [`JobHandle`].
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<StorageRegistry>,
}

impl Engine {
    /// Create an engine over an explicitly constructed registry
    pub fn new(registry: StorageRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// The registry jobs resolve their backends from
    pub fn registry(&self) -> &Arc<StorageRegistry> {
        &self.registry
    }

    /// Submit a job and return the handle controlling it
    ///
    /// Pre-flight runs off the async runtime: every pair must dispatch to a
    /// registered backend and resolve to a metadata record before any I/O
    /// begins, and sources are measured for progress totals and the space
    /// check.
    pub async fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        let id = JobId::new();
        let registry = Arc::clone(&self.registry);
        let pairs = request.pairs.clone();

        let totals = tokio::task::spawn_blocking(move || pre_flight(&registry, &pairs))
            .await
            .map_err(|err| Error::program(format!("pre-flight task failed: {err}")))??;

        info!(
            "job {} submitted: {:?}, {} pairs, {} bytes pending",
            id,
            request.kind,
            request.pairs.len(),
            totals.bytes
        );

        let gate = Arc::new(StateGate::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (worker_interaction, interaction_handle) =
            interaction(Arc::clone(&gate), events_tx.clone());

        let worker = TransferWorker::new(
            Arc::clone(&self.registry),
            Arc::clone(&gate),
            worker_interaction,
            events_tx,
            request.options,
            totals,
        );
        let kind = request.kind;
        let pairs = request.pairs;
        let join = tokio::task::spawn_blocking(move || worker.run(kind, pairs));

        Ok(JobHandle {
            id,
            kind,
            state: gate,
            interaction: interaction_handle,
            events: Some(events_rx),
            join: Some(join),
        })
    }
}

/// Resolve every pair and measure the sources
fn pre_flight(
    registry: &StorageRegistry,
    pairs: &[porter_types::TransferPair],
) -> Result<SourceSummary> {
    for pair in pairs {
        for location in [&pair.source, &pair.destination] {
            let backend = registry.get(location).ok_or_else(|| {
                Error::io(
                    location.to_string(),
                    format!("no storage backend for scheme '{}'", location.scheme()),
                )
            })?;
            backend
                .resolve(location)
                .map_err(|err| Error::io(location.to_string(), err.to_string()))?;
        }
    }

    let sources: Vec<Location> = pairs.iter().map(|pair| pair.source.clone()).collect();
    match measure(registry, &sources) {
        Ok(totals) => Ok(totals),
        Err(err) => {
            // Progress totals are best-effort; the space check degrades to a
            // no-op rather than blocking submission.
            warn!("source measurement failed: {err}");
            Ok(SourceSummary::default())
        }
    }
}

/// Control surface for one running job
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    kind: JobKind,
    state: Arc<StateGate>,
    interaction: InteractionHandle,
    events: Option<mpsc::UnboundedReceiver<JobEvent>>,
    join: Option<JoinHandle<(TransferStats, JobOutcome)>>,
}

impl JobHandle {
    /// Identifier of this job
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Class of operation the job executes
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Park the worker at its next state check
    pub fn pause(&self) {
        debug!("job {} paused", self.id);
        self.state.pause();
    }

    /// Release a paused worker
    pub fn resume(&self) {
        debug!("job {} resumed", self.id);
        self.state.resume();
    }

    /// Cancel the job
    ///
    /// Sets the stop flag, wakes a pause park, and answers any outstanding
    /// decision wait with Abort so the worker unwinds promptly.
    pub fn cancel(&self) {
        info!("job {} cancelled", self.id);
        self.state.stop();
        self.interaction.set_decision(Decision::Abort);
    }

    /// Answer the outstanding error; false when no error is pending
    pub fn set_decision(&self, decision: Decision) -> bool {
        self.interaction.set_decision(decision)
    }

    /// Current operation state
    pub fn current_state(&self) -> OpState {
        self.state.current()
    }

    /// Take the event stream; `None` after the first call
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<JobEvent>> {
        self.events.take()
    }

    /// Wait for the worker to reach a terminal state
    pub async fn wait(&mut self) -> Result<JobReport> {
        let join = self
            .join
            .take()
            .ok_or_else(|| Error::program("job already awaited"))?;
        let (stats, outcome) = join
            .await
            .map_err(|err| Error::program(format!("worker thread failed: {err}")))?;
        Ok(JobReport { stats, outcome })
    }
}
