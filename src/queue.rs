//! # Priority Queues
//!
//! A 5-level array of FIFO pid sequences, used for the ready queue and for
//! the per-pool blocked queues. Popping scans the levels from the most
//! urgent down and takes the head of the first non-empty one: strict
//! priority, FIFO tie-break.

use heapless::Deque;

use crate::config::{NUM_PRIORITIES, NUM_PROCS};
use crate::process::{Pid, Priority};

/// Multi-level FIFO of pids.
pub struct PriorityQueue {
    levels: [Deque<Pid, NUM_PROCS>; NUM_PRIORITIES],
}

impl PriorityQueue {
    pub const fn new() -> Self {
        Self {
            levels: [const { Deque::new() }; NUM_PRIORITIES],
        }
    }

    /// Append `pid` to the tail of its priority level.
    ///
    /// A pid is never queued twice; enqueueing one that is already present
    /// leaves the queue unchanged.
    pub fn enqueue(&mut self, pid: Pid, priority: Priority) {
        if self.contains(pid) {
            log::warn!("pid {} already queued, ignoring", pid);
            return;
        }
        // Capacity equals the process table size and pids are unique, so
        // the level cannot be full here.
        let _ = self.levels[priority.level()].push_back(pid);
        log::trace!("queued pid {} at level {}", pid, priority.level());
    }

    /// Remove and return the oldest pid of the most urgent non-empty level.
    pub fn pop(&mut self) -> Option<Pid> {
        self.levels.iter_mut().find_map(|level| level.pop_front())
    }

    /// Priority of the most urgent non-empty level.
    pub fn peek_priority(&self) -> Option<Priority> {
        self.levels
            .iter()
            .position(|level| !level.is_empty())
            .and_then(Priority::from_level)
    }

    /// Level currently holding `pid`.
    pub fn level_of(&self, pid: Pid) -> Option<Priority> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|&p| p == pid))
            .and_then(Priority::from_level)
    }

    #[inline]
    pub fn contains(&self, pid: Pid) -> bool {
        self.level_of(pid).is_some()
    }

    /// Remove `pid` wherever it is queued. Returns `true` if it was present.
    /// The relative order of the remaining pids is preserved.
    pub fn remove(&mut self, pid: Pid) -> bool {
        let Some(priority) = self.level_of(pid) else {
            return false;
        };
        let level = &mut self.levels[priority.level()];
        for _ in 0..level.len() {
            if let Some(p) = level.pop_front() {
                if p != pid {
                    let _ = level.push_back(p);
                }
            }
        }
        true
    }

    /// Move `pid` to the tail of the level for `priority`, if it is queued.
    pub fn relocate(&mut self, pid: Pid, priority: Priority) -> bool {
        if !self.remove(pid) {
            return false;
        }
        let _ = self.levels[priority.level()].push_back(pid);
        true
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(|level| level.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|level| level.is_empty())
    }

    /// Pids queued at `priority`, head first.
    pub fn iter_level(&self, priority: Priority) -> impl Iterator<Item = Pid> + '_ {
        self.levels[priority.level()].iter().copied()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
