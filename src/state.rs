// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! State information about the trap-entry layer itself.

use core::sync::atomic::{AtomicU8, Ordering};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

/// Different stages in the layer's execution.
#[derive(Copy, Clone, Eq, PartialEq)]
enum State {
    /// Collaborators (console, dispatcher, fill handler) may still be registered.
    Init,

    /// Trap vectors are live. Registration is over.
    TrapReady,
}

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Maintains the layer state and state transitions.
pub struct StateManager(AtomicU8);

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

static STATE_MANAGER: StateManager = StateManager::new();

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Return a reference to the global StateManager.
pub fn state_manager() -> &'static StateManager {
    &STATE_MANAGER
}

impl StateManager {
    const INIT: u8 = 0;
    const TRAP_READY: u8 = 1;

    /// Create a new instance.
    pub const fn new() -> Self {
        Self(AtomicU8::new(Self::INIT))
    }

    /// Return the current state.
    fn state(&self) -> State {
        let state = self.0.load(Ordering::Acquire);

        match state {
            Self::INIT => State::Init,
            Self::TRAP_READY => State::TrapReady,
            _ => panic!("Invalid LAYER_STATE"),
        }
    }

    /// Return if the layer is in the init state.
    pub fn is_init(&self) -> bool {
        self.state() == State::Init
    }

    /// Transition from Init to TrapReady.
    pub fn transition_to_trap_ready(&self) {
        if self
            .0
            .compare_exchange(
                Self::INIT,
                Self::TRAP_READY,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            panic!("transition_to_trap_ready() called while state != Init");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// A fresh manager starts out in the init state and leaves it exactly once.
    #[test]
    fn state_transition_sanity() {
        let manager = StateManager::new();

        assert!(manager.is_init());

        manager.transition_to_trap_ready();
        assert!(!manager.is_init());
    }
}
