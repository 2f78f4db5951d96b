//! Detection loop states: Idle → Processing → (Idle | Cooldown → Idle).
//! Plus the debounce record that stops one utterance from firing twice.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

/// Phases of one detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LoopState {
    /// Waiting on the microphone.
    Idle,
    /// Running gate, suppressor and engine on the current frame.
    Processing,
    /// A trigger fired; settling and draining before listening again.
    Cooldown,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "Idle"),
            LoopState::Processing => write!(f, "Processing"),
            LoopState::Cooldown => write!(f, "Cooldown"),
        }
    }
}

impl LoopState {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: LoopState) -> bool {
        matches!(
            (self, next),
            (LoopState::Idle, LoopState::Processing)
                | (LoopState::Processing, LoopState::Idle) // silent frame or no match
                | (LoopState::Processing, LoopState::Cooldown)
                | (LoopState::Cooldown, LoopState::Idle)
        )
    }
}

/// Owned by the loop; no locking needed.
#[derive(Debug)]
pub struct LoopStateMachine {
    state: LoopState,
}

impl LoopStateMachine {
    pub fn new() -> Self {
        Self {
            state: LoopState::Idle,
        }
    }

    pub fn current(&self) -> LoopState {
        self.state
    }

    /// Attempt a state transition. Invalid ones are logged and leave the state unchanged.
    pub fn transition(&mut self, next: LoopState) -> std::result::Result<LoopState, String> {
        let current = self.state;
        if !current.can_transition_to(next) {
            let msg = format!("invalid transition: {} -> {}", current, next);
            warn!("{}", msg);
            return Err(msg);
        }
        self.state = next;
        debug!(from = %current, to = %next, "state_transition");
        Ok(next)
    }
}

impl Default for LoopStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Debounce record for confirmed triggers.
#[derive(Debug, Clone)]
pub struct DetectionState {
    pub last_trigger: Option<Instant>,
    pub cooldown: Duration,
}

impl DetectionState {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_trigger: None,
            cooldown,
        }
    }

    /// True if no trigger happened yet or the cooldown has elapsed at `now`.
    pub fn should_trigger(&self, now: Instant) -> bool {
        match self.last_trigger {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.cooldown,
        }
    }

    pub fn record_trigger(&mut self, now: Instant) {
        self.last_trigger = Some(now);
    }
}
