//! Cancellable timers owned by the engine.
//!
//! Timers are data, not threads: the engine stores deadlines and fires them
//! from its own update loop, one per turn, so a transition that cancels a
//! timer can never race with that timer firing.

use serde::{Deserialize, Serialize};

/// What a timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Snooze elapsed: re-trigger.
    Snooze,
    /// Re-issue the vibration pattern.
    VibrationPulse,
}

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy)]
struct Timer {
    id: TimerId,
    kind: TimerKind,
    deadline_ms: u64,
}

/// A due timer popped from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: TimerId,
    pub kind: TimerKind,
    pub deadline_ms: u64,
}

/// Small deadline queue. Ties fire in scheduling order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    timers: Vec<Timer>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: TimerKind, deadline_ms: u64) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.timers.push(Timer { id, kind, deadline_ms });
        id
    }

    /// Returns false if the timer already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    /// Cancel every pending timer of one kind.
    pub fn cancel_kind(&mut self, kind: TimerKind) -> usize {
        let before = self.timers.len();
        self.timers.retain(|t| t.kind != kind);
        before - self.timers.len()
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    /// Remove and return the earliest timer due at `now_ms`, if any.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<FiredTimer> {
        let index = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline_ms <= now_ms)
            .min_by_key(|(_, t)| (t.deadline_ms, t.id))
            .map(|(i, _)| i)?;
        let timer = self.timers.remove(index);
        Some(FiredTimer {
            id: timer.id,
            kind: timer.kind,
            deadline_ms: timer.deadline_ms,
        })
    }

    /// Deadline of the earliest pending timer of `kind`.
    pub fn deadline_of(&self, kind: TimerKind) -> Option<u64> {
        self.timers
            .iter()
            .filter(|t| t.kind == kind)
            .map(|t| t.deadline_ms)
            .min()
    }

    /// Earliest pending deadline overall.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.iter().map(|t| t.deadline_ms).min()
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.timers.iter().any(|t| t.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
