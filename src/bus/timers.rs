//! One-shot timer queue for service hosts.
//!
//! Hosts arm delayed checks through
//! [`HostContext::schedule`](crate::host::HostContext::schedule); the engine
//! fires them in due order from `tick`.  There is no cancellation: each
//! entry carries a [`TimerTag`] whose `seq` the owner compares against its
//! current state when the timer fires, so superseded timers do nothing.
//!
//! ```text
//!   schedule(due=200, owner=3, {HOLD, seq=7})
//!   schedule(due=250, owner=3, {RESET, seq=8})
//!        │
//!   tick(now=300) ─▶ fire (3, HOLD/7)  → owner sees seq 8, ignores
//!                 ─▶ fire (3, RESET/8) → acts
//! ```

/// Index of a service host inside the engine.
pub type HostId = usize;

/// Payload of a timer: what to check, and the token valid when armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTag {
    pub kind: u8,
    pub seq: u32,
}

/// A timer that has come due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub due_ms: u64,
    pub owner: HostId,
    pub tag: TimerTag,
}

/// Timers ordered by due time; equal due times fire in arming order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: Vec<FiredTimer>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due_ms: u64, owner: HostId, tag: TimerTag) {
        let pos = self.entries.partition_point(|e| e.due_ms <= due_ms);
        self.entries.insert(pos, FiredTimer { due_ms, owner, tag });
    }

    /// Remove and return the earliest timer due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<FiredTimer> {
        if self.entries.first()?.due_ms <= now_ms {
            Some(self.entries.remove(0))
        } else {
            None
        }
    }

    pub fn next_due(&self) -> Option<u64> {
        self.entries.first().map(|e| e.due_ms)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
