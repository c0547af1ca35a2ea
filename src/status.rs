use crate::observer::{SessionObserver, SessionStatus};
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard};
use vpcore::error::SessionError;
use vpcore::state::{InvalidTransition, SessionPhase, SessionStateMachine, SessionTransition};

struct PublisherState {
    machine: SessionStateMachine,
    epoch: u64,
}

/// Owns the state machine and publishes every phase change exactly once.
///
/// Each session applies its transitions under the epoch it was created in.
/// Starting a new connection bumps the epoch, so anything a superseded
/// session reports afterwards is dropped.
pub struct StatusPublisher {
    state: Mutex<PublisherState>,
    observer: Arc<dyn SessionObserver>,
}

impl StatusPublisher {
    pub fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            state: Mutex::new(PublisherState {
                machine: SessionStateMachine::new(),
                epoch: 0,
            }),
            observer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PublisherState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Starts a new epoch and returns it.
    pub fn begin_epoch(&self) -> u64 {
        let mut state = self.lock();
        state.epoch += 1;
        state.epoch
    }

    /// Applies `transition` if `epoch` is current. Returns whether the phase
    /// changed; stale transitions are ignored and return `Ok(false)`.
    pub fn apply(
        &self,
        epoch: u64,
        transition: SessionTransition,
    ) -> Result<bool, InvalidTransition> {
        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(
                target: "Client",
                "Dropping {transition:?} from stale epoch {epoch} (current {})",
                state.epoch
            );
            return Ok(false);
        }

        let changed = state.machine.apply_transition(transition)?;
        if changed {
            let status = SessionStatus::new(state.machine.phase(), state.machine.last_error());
            // Published under the lock so observers see changes in order.
            self.observer.on_status_changed(&status);
        }
        Ok(changed)
    }

    /// Applies `transition` in whatever epoch is current.
    pub fn apply_current(&self, transition: SessionTransition) -> Result<bool, InvalidTransition> {
        let epoch = self.epoch();
        self.apply(epoch, transition)
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().machine.phase()
    }

    pub fn is_muted(&self) -> bool {
        self.lock().machine.is_muted()
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.lock().machine.last_error().cloned()
    }

    pub fn snapshot(&self) -> SessionStatus {
        let state = self.lock();
        SessionStatus::new(state.machine.phase(), state.machine.last_error())
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("StatusPublisher")
            .field("phase", &state.machine.phase())
            .field("epoch", &state.epoch)
            .finish()
    }
}
