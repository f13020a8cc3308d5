//! Named one-shot timers.
//!
//! A `Timer` is only a deadline slot: it never spawns anything. Whoever
//! owns it asks for the earliest deadline, sleeps until then, and calls
//! `expire()` to find out whether it fired.

use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Timer {
    name: &'static str,
    deadline: Option<Instant>,
}

impl Timer {
    pub const fn new(name: &'static str) -> Timer {
        Timer {
            name,
            deadline: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Arms the timer, replacing any pending deadline.
    pub fn arm(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Arms the timer only if it is not already pending. Returns whether
    /// the deadline was set.
    pub fn arm_once(&mut self, deadline: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(deadline);
        true
    }

    /// Disarms the timer. Returns whether it was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// If the deadline has passed, disarms the timer and returns true.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
