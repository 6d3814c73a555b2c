//! Poll-until state machine.

use std::time::Duration;

/// Where a poll stands after an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Predicate not yet true; wait `interval` and try again
    Pending,
    /// Predicate held on the given attempt
    Satisfied { attempts: u32 },
    /// Every attempt was used without the predicate holding
    Exhausted { attempts: u32 },
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Fixed-interval poll bounded by an attempt count.
///
/// Each attempt is preceded by one interval, so a predicate that first
/// holds on attempt `n` completes after `n * interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUntil {
    attempt: u32,
    max_attempts: u32,
    interval: Duration,
    state: PollState,
}

impl PollUntil {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            interval,
            state: PollState::Pending,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Attempts consumed so far.
    pub fn attempts_used(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Record the outcome of one attempt. Observations after a terminal
    /// state are ignored.
    pub fn observe(&mut self, satisfied: bool) -> PollState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.attempt += 1;
        self.state = if satisfied {
            PollState::Satisfied { attempts: self.attempt }
        } else if self.attempt >= self.max_attempts {
            PollState::Exhausted { attempts: self.attempt }
        } else {
            PollState::Pending
        };
        self.state
    }
}
