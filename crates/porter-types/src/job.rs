//! Job model: identifiers, operation state, decisions and events

use crate::error::{Error, ErrorKind};
use crate::location::Location;
use crate::stats::{ProgressSnapshot, TransferStats};
use uuid::Uuid;

/// Unique identifier for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Class of bulk operation a worker executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobKind {
    /// Copy sources to destinations
    Copy,
    /// Copy sources to destinations, then delete completed sources
    Move,
    /// Delete sources
    Delete,
}

/// Shared operation state, mutated by the supervisor and polled by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpState {
    /// Work is proceeding
    Running,
    /// Parked, either on a pending decision or a supervisor pause
    Paused,
    /// Cancelled; all in-flight loops unwind promptly
    Stopped,
}

/// Supervisor's resolution of a paused error
///
/// `NoAction` is the resting value and means "proceed without issue";
/// `Overwrite`/`Merge`/`Coexist` are the destination-collision variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Decision {
    /// No error outstanding, proceed
    #[default]
    NoAction,
    /// Re-attempt the failed step
    Retry,
    /// Abandon the current pair only
    Skip,
    /// Abort the whole job
    Abort,
    /// Replace the existing destination
    Overwrite,
    /// Merge into the existing destination directory
    Merge,
    /// Keep both under a new destination name
    Coexist,
}

/// Result of one worker step (a file, a directory, a delete target)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step completed
    Done,
    /// Step abandoned on a Skip decision; siblings continue
    Skipped,
    /// Step failed fatally (Abort decision or program error)
    Aborted,
    /// The stop flag was observed; unwind without a decision
    Stopped,
}

impl StepOutcome {
    /// Whether the step allows the job to continue with further entries
    pub fn continues(self) -> bool {
        matches!(self, Self::Done | Self::Skipped)
    }
}

/// Terminal outcome of a whole job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobOutcome {
    /// All pairs processed (skips included)
    Completed,
    /// Terminated by an Abort decision or a program error
    Aborted,
    /// Terminated by cancellation
    Cancelled,
}

/// Transient record of a failed step awaiting a supervisor decision
///
/// Created on failure, surfaced once, its decision consumed exactly once,
/// then discarded.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PendingError {
    /// Source location of the pair being processed
    pub source: Location,
    /// Destination location of the pair being processed
    pub destination: Location,
    /// Location the failure actually occurred on
    pub error_location: Location,
    /// Category the supervisor dispatches on
    pub kind: ErrorKind,
    /// Human-readable cause
    pub message: String,
}

impl PendingError {
    /// Build a pending-error record from a worker error
    pub fn new(
        source: Location,
        destination: Location,
        error_location: Location,
        error: &Error,
    ) -> Self {
        Self {
            source,
            destination,
            error_location,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Notification events published to the supervisor
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The operation state changed
    StateChanged(OpState),
    /// Progress advanced
    Progress(ProgressSnapshot),
    /// A step failed and the worker is parked awaiting a decision
    NeedsDecision(PendingError),
    /// The job reached a terminal state
    Finished {
        /// Aggregate accounting for the job
        stats: TransferStats,
        /// How the job ended
        outcome: JobOutcome,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_uniqueness() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_default_decision_is_no_action() {
        assert_eq!(Decision::default(), Decision::NoAction);
    }

    #[test]
    fn test_step_outcome_continues() {
        assert!(StepOutcome::Done.continues());
        assert!(StepOutcome::Skipped.continues());
        assert!(!StepOutcome::Aborted.continues());
        assert!(!StepOutcome::Stopped.continues());
    }

    #[test]
    fn test_pending_error_captures_kind() {
        let source = Location::local("/src/a");
        let dest = Location::local("/dst/a");
        let err = Error::read("/src/a", "interrupted");
        let pending = PendingError::new(source.clone(), dest, source, &err);
        assert_eq!(pending.kind, ErrorKind::Read);
        assert!(pending.message.contains("interrupted"));
    }
}
