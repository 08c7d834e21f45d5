//! Child lifecycle state machine
//!
//! One supervised child moves NoChild → Starting → Running → Terminating →
//! NoChild. A failed spawn aborts back to NoChild; an unprompted exit reaps
//! straight from Running.

use crate::error::Error;

use state_machines::state_machine;

state_machine! {
    name: ChildMachine,
    dynamic: true,
    initial: NoChild,
    states: [NoChild, Starting, Running, Terminating],
    events {
        spawn {
            transition: { from: NoChild, to: Starting }
        }
        started {
            transition: { from: Starting, to: Running }
        }
        abort {
            transition: { from: Starting, to: NoChild }
        }
        terminate {
            transition: { from: Running, to: Terminating }
        }
        reap {
            transition: { from: [Running, Terminating], to: NoChild }
        }
    }
}

/// Child state as a plain enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    NoChild,
    Starting,
    Running,
    Terminating,
}

impl ChildState {
    /// Parse state from its name
    pub fn from_name(s: &str) -> Self {
        match s {
            "Starting" => ChildState::Starting,
            "Running" => ChildState::Running,
            "Terminating" => ChildState::Terminating,
            _ => ChildState::NoChild,
        }
    }
}

/// Transition events, one per lifecycle step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Spawn,
    Started,
    Abort,
    Terminate,
    Reap,
}

/// Tracks the lifecycle of the single supervised child
pub struct Lifecycle {
    machine: DynamicChildMachine<()>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            machine: ChildMachine::new(()).into_dynamic(),
        }
    }

    /// Current state
    pub fn state(&self) -> ChildState {
        ChildState::from_name(self.machine.current_state())
    }

    /// Apply one step, rejecting transitions the lifecycle does not allow
    pub fn step(&mut self, step: Step) -> crate::error::Result<ChildState> {
        let from = self.state();
        let event = match step {
            Step::Spawn => ChildMachineEvent::Spawn,
            Step::Started => ChildMachineEvent::Started,
            Step::Abort => ChildMachineEvent::Abort,
            Step::Terminate => ChildMachineEvent::Terminate,
            Step::Reap => ChildMachineEvent::Reap,
        };

        self.machine
            .handle(event)
            .map_err(|e| Error::Lifecycle(format!("{:?} from {:?}: {:?}", step, from, e)))?;
        Ok(self.state())
    }
}
