//! Error/decision rendezvous between the worker and its supervisor
//!
//! When a step fails, the worker publishes a [`PendingError`] and parks
//! until the supervisor answers with a [`Decision`]. Each occurrence arms
//! its own single-slot channel: a decision delivered after the slot is
//! armed but before the worker parks is buffered, so the hand-off cannot
//! deadlock on ordering. There is no timeout; the supervisor must answer
//! or cancel.

use crate::state::StateGate;
use porter_types::{Decision, JobEvent, OpState, PendingError};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type DecisionSlot = Arc<Mutex<Option<oneshot::Sender<Decision>>>>;

/// Worker side of the protocol
#[derive(Debug)]
pub struct Interaction {
    state: Arc<StateGate>,
    events: mpsc::UnboundedSender<JobEvent>,
    slot: DecisionSlot,
}

/// Supervisor side of the protocol
#[derive(Debug, Clone)]
pub struct InteractionHandle {
    slot: DecisionSlot,
}

/// Create a connected worker/supervisor pair
pub fn interaction(
    state: Arc<StateGate>,
    events: mpsc::UnboundedSender<JobEvent>,
) -> (Interaction, InteractionHandle) {
    let slot: DecisionSlot = Arc::new(Mutex::new(None));
    (
        Interaction {
            state,
            events,
            slot: Arc::clone(&slot),
        },
        InteractionHandle { slot },
    )
}

impl Interaction {
    /// Surface a failed step and block until the supervisor decides
    ///
    /// Transitions the job to `Paused`, publishes the pending error, then
    /// parks the worker thread. Cancellation takes priority: an already
    /// stopped job returns `Abort` without parking, and `cancel()` answers
    /// an in-flight wait the same way.
    pub fn report_and_wait(&self, pending: PendingError) -> Decision {
        if !self.state.pause_for_error() {
            debug!("job stopped, not entering decision wait for {}", pending.error_location);
            return Decision::Abort;
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self
                .slot
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *slot = Some(tx);
        }

        let _ = self.events.send(JobEvent::StateChanged(OpState::Paused));
        if self.events.send(JobEvent::NeedsDecision(pending)).is_err() {
            // Nobody is listening; parking would never be answered.
            self.state.resume_from_error();
            return Decision::Abort;
        }

        // Blocks indefinitely; the supervisor answers or cancels.
        let decision = rx.blocking_recv().unwrap_or(Decision::Abort);

        self.state.resume_from_error();
        if !self.state.is_stopped() {
            let _ = self.events.send(JobEvent::StateChanged(OpState::Running));
        }
        debug!("decision received: {:?}", decision);
        decision
    }
}

impl InteractionHandle {
    /// Answer the outstanding error wait, if any
    ///
    /// Consumes the armed slot; returns false when no error is outstanding.
    pub fn set_decision(&self, decision: Decision) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(decision).is_ok(),
            None => {
                warn!("set_decision({:?}) with no outstanding error", decision);
                false
            }
        }
    }
}
