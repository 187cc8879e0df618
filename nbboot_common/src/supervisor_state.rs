//! Observable lifecycle state for the tunnel supervisor.
//!
//! The supervisor moves through `Idle → Starting → Running → Stopping → Stopped`.
//! State lives in a `tokio::sync::watch` channel so that any number of observers
//! (the launcher, tests, log reporters) see transitions immediately without polling.
//!
//! # Example
//!
//! ```rust
//! use nbboot_common::supervisor_state::{SupervisorState, SupervisorStateMachine};
//!
//! let sm = SupervisorStateMachine::new();
//! sm.transition_to_starting().unwrap();
//! sm.transition_to_running().unwrap();
//! assert_eq!(sm.current(), SupervisorState::Running);
//!
//! sm.transition_to_stopping().unwrap();
//! sm.transition_to_stopped().unwrap();
//! assert!(sm.current().is_terminal());
//! ```

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Tunnels may still be registered; nothing has been spawned.
    Idle,
    /// Child processes are being spawned.
    Starting,
    /// All spawns attempted; output readers are live.
    Running,
    /// Termination signals are being delivered to owned processes.
    Stopping,
    /// Terminal. All child handles released.
    Stopped,
}

impl SupervisorState {
    /// Returns true once the supervisor can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SupervisorState::Stopped)
    }

    /// Returns true while the supervisor owns (or is acquiring) child processes.
    pub fn owns_processes(&self) -> bool {
        matches!(self, SupervisorState::Starting | SupervisorState::Running)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Stopping => write!(f, "stopping"),
            SupervisorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Observable supervisor state machine backed by a watch channel.
#[derive(Clone)]
pub struct SupervisorStateMachine {
    sender: Arc<watch::Sender<SupervisorState>>,
    // Keep a receiver so the channel stays open with no subscribers
    _receiver: watch::Receiver<SupervisorState>,
}

impl fmt::Debug for SupervisorStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorStateMachine")
            .field("state", &self.current())
            .finish()
    }
}

impl SupervisorStateMachine {
    /// Create a new state machine in the `Idle` state.
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(SupervisorState::Idle);
        Self {
            sender: Arc::new(sender),
            _receiver: receiver,
        }
    }

    /// Get the current state without blocking.
    pub fn current(&self) -> SupervisorState {
        *self.sender.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.sender.subscribe()
    }

    fn transition(
        &self,
        allowed: impl Fn(SupervisorState) -> bool,
        next: SupervisorState,
    ) -> bool {
        self.sender.send_if_modified(|state| {
            if allowed(*state) {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Idle → Starting
    pub fn transition_to_starting(&self) -> Result<(), &'static str> {
        if self.transition(|s| s == SupervisorState::Idle, SupervisorState::Starting) {
            Ok(())
        } else {
            Err("Can only start an idle supervisor")
        }
    }

    /// Starting → Running
    pub fn transition_to_running(&self) -> Result<(), &'static str> {
        if self.transition(|s| s == SupervisorState::Starting, SupervisorState::Running) {
            Ok(())
        } else {
            Err("Can only transition to Running from Starting")
        }
    }

    /// Starting | Running → Stopping
    pub fn transition_to_stopping(&self) -> Result<(), &'static str> {
        if self.transition(|s| s.owns_processes(), SupervisorState::Stopping) {
            Ok(())
        } else {
            Err("Can only stop a starting or running supervisor")
        }
    }

    /// Stopping | Idle → Stopped
    ///
    /// An idle supervisor never spawned anything, so it may be stopped directly.
    pub fn transition_to_stopped(&self) -> Result<(), &'static str> {
        if self.transition(
            |s| matches!(s, SupervisorState::Stopping | SupervisorState::Idle),
            SupervisorState::Stopped,
        ) {
            Ok(())
        } else {
            Err("Can only transition to Stopped from Stopping or Idle")
        }
    }
}

impl Default for SupervisorStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
