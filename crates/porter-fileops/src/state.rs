//! Shared operation state with a pause park
//!
//! The gate is the single piece of state mutated by both the supervisor
//! thread and the worker thread. The worker polls it before and after every
//! blocking call; `Stopped` wins over everything else and is never left.

use porter_types::OpState;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Shared Running/Paused/Stopped flag
///
/// Wrapped in an `Arc` and shared between one worker and its supervisor.
#[derive(Debug)]
pub struct StateGate {
    state: Mutex<OpState>,
    parked: Condvar,
}

impl Default for StateGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StateGate {
    /// Create a gate in the `Running` state
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OpState::Running),
            parked: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OpState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current state
    pub fn current(&self) -> OpState {
        *self.lock()
    }

    /// Whether cancellation has been requested
    pub fn is_stopped(&self) -> bool {
        self.current() == OpState::Stopped
    }

    /// Supervisor entry point: park the worker at its next gate check
    ///
    /// No-op unless the job is running.
    pub fn pause(&self) {
        let mut state = self.lock();
        if *state == OpState::Running {
            *state = OpState::Paused;
        }
    }

    /// Supervisor entry point: release a paused worker
    pub fn resume(&self) {
        let mut state = self.lock();
        if *state == OpState::Paused {
            *state = OpState::Running;
            self.parked.notify_all();
        }
    }

    /// Supervisor entry point: cancel the job
    ///
    /// Terminal; wakes any parked worker so in-flight loops unwind promptly.
    pub fn stop(&self) {
        let mut state = self.lock();
        *state = OpState::Stopped;
        self.parked.notify_all();
    }

    /// Worker-side transition into `Paused` while an error is outstanding
    ///
    /// Returns false when the job is already stopped.
    pub fn pause_for_error(&self) -> bool {
        let mut state = self.lock();
        match *state {
            OpState::Stopped => false,
            _ => {
                *state = OpState::Paused;
                true
            }
        }
    }

    /// Worker-side transition back to `Running` after a decision arrived
    pub fn resume_from_error(&self) {
        let mut state = self.lock();
        if *state == OpState::Paused {
            *state = OpState::Running;
        }
    }

    /// The worker's state check, called at every loop boundary and around
    /// every blocking call
    ///
    /// Returns true to proceed; blocks while paused; returns false once
    /// stopped.
    pub fn check(&self) -> bool {
        let mut state = self.lock();
        loop {
            match *state {
                OpState::Running => return true,
                OpState::Stopped => return false,
                OpState::Paused => {
                    state = self
                        .parked
                        .wait(state)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_running_check_passes() {
        let gate = StateGate::new();
        assert!(gate.check());
        assert_eq!(gate.current(), OpState::Running);
    }

    #[test]
    fn test_stop_fails_check() {
        let gate = StateGate::new();
        gate.stop();
        assert!(!gate.check());
        assert!(gate.is_stopped());
    }

    #[test]
    fn test_pause_parks_until_resume() {
        let gate = Arc::new(StateGate::new());
        gate.pause();

        let worker_gate = Arc::clone(&gate);
        let worker = std::thread::spawn(move || worker_gate.check());

        // Give the worker a moment to park, then release it
        std::thread::sleep(Duration::from_millis(50));
        gate.resume();
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_stop_releases_parked_worker() {
        let gate = Arc::new(StateGate::new());
        gate.pause();

        let worker_gate = Arc::clone(&gate);
        let worker = std::thread::spawn(move || worker_gate.check());

        std::thread::sleep(Duration::from_millis(50));
        gate.stop();
        assert!(!worker.join().unwrap());
    }

    #[test]
    fn test_pause_for_error_refused_once_stopped() {
        let gate = StateGate::new();
        gate.stop();
        assert!(!gate.pause_for_error());
    }

    #[test]
    fn test_resume_does_not_revive_stopped_job() {
        let gate = StateGate::new();
        gate.stop();
        gate.resume();
        assert_eq!(gate.current(), OpState::Stopped);
    }
}
