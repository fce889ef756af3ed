//! Privilege mode and the coarse run-state state machine.

use std::fmt;

/// The CPU's current privilege level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Full access to the entire address space.
    Kernel,
    /// Access to `[21, 999]` is denied by the protection unit.
    User,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Kernel => write!(f, "kernel"),
            Mode::User => write!(f, "user"),
        }
    }
}

/// The engine's coarse run state, mirroring § 4.5 of the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Executing in kernel mode.
    RunningKernel,
    /// Executing in user mode.
    RunningUser,
    /// The run loop has terminated; no further instructions will execute.
    Halted,
}

impl RunState {
    /// Derives the run state from the current mode, given the machine
    /// hasn't halted.
    pub fn from_mode(mode: Mode) -> Self {
        match mode {
            Mode::Kernel => RunState::RunningKernel,
            Mode::User => RunState::RunningUser,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_tracks_mode() {
        assert_eq!(RunState::from_mode(Mode::Kernel), RunState::RunningKernel);
        assert_eq!(RunState::from_mode(Mode::User), RunState::RunningUser);
    }
}
