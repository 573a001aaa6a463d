//! Single-slot transition timer.
//!
//! Holds at most one pending `(target, deadline)`. Scheduling always cancels
//! and replaces whatever was pending, so transitions never stack. Time comes
//! from `tokio::time::Instant`, which lets tests drive it with tokio's paused
//! clock.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Pending<T> {
    target: T,
    deadline: Instant,
}

/// A cancel-and-replace timer slot.
#[derive(Debug, Clone)]
pub struct TransitionSlot<T> {
    pending: Option<Pending<T>>,
}

impl<T> Default for TransitionSlot<T> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<T: Copy> TransitionSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `target` to fire after `delay`, discarding any pending target.
    ///
    /// Returns the target that was replaced, if any.
    pub fn schedule(&mut self, target: T, delay: Duration) -> Option<T> {
        let replaced = self.pending.map(|p| p.target);
        self.pending = Some(Pending {
            target,
            deadline: Instant::now() + delay,
        });
        replaced
    }

    /// Drop the pending target without firing it.
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|p| p.target)
    }

    /// The pending target, if any.
    pub fn pending(&self) -> Option<T> {
        self.pending.map(|p| p.target)
    }

    /// When the pending target fires.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.deadline)
    }

    /// Fire the pending target if its deadline has passed.
    pub fn poll(&mut self) -> Option<T> {
        self.poll_at(Instant::now())
    }

    /// Fire the pending target if `now` is at or past its deadline.
    pub fn poll_at(&mut self, now: Instant) -> Option<T> {
        match self.pending {
            Some(p) if now >= p.deadline => {
                self.pending = None;
                Some(p.target)
            }
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
