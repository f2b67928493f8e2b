//! # Process Control Block
//!
//! Defines the process model for PostOS. PCBs are created once at boot in
//! a static table indexed by pid and are never destroyed.
//!
//! Each PCB carries its scheduling state and its mailbox. The saved
//! execution context is owned by the port layer and stored by the kernel
//! in a parallel array (see [`crate::arch::Port::Context`]).

use crate::config::{NUM_PRIORITIES, PID_NULL};
use crate::message::Mailbox;

/// Process identifier: the index of the PCB in the process table.
pub type Pid = usize;

/// Process entry point. Receives the kernel it runs on.
pub type ProcEntry<K> = fn(&'static K);

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Scheduling priority (lower number = more urgent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    pub const HIGH: Priority = Priority(0);
    pub const MEDIUM: Priority = Priority(1);
    pub const LOW: Priority = Priority(2);
    pub const LOWEST: Priority = Priority(3);
    /// Reserved for the idle process.
    pub const NULL: Priority = Priority(NUM_PRIORITIES as u8 - 1);

    /// Queue level of this priority.
    #[inline]
    pub const fn level(self) -> usize {
        self.0 as usize
    }

    /// Build a priority from a raw level, rejecting out-of-range values.
    pub const fn from_level(level: usize) -> Option<Priority> {
        if level < NUM_PRIORITIES {
            Some(Priority(level as u8))
        } else {
            None
        }
    }

    /// `true` if a process at this priority outranks one at `other`.
    #[inline]
    pub fn is_higher_than(self, other: Priority) -> bool {
        self.0 < other.0
    }

    /// Priorities a process other than the idle process may hold.
    #[inline]
    pub fn is_assignable(self) -> bool {
        self.0 < Priority::NULL.0
    }
}

// ---------------------------------------------------------------------------
// Process state machine
// ---------------------------------------------------------------------------

/// Execution state of a process.
///
/// ```text
///   ┌─────┐ first dispatch ┌─────────┐   yield    ┌───────┐
///   │ New │ ─────────────► │ Running │ ─────────► │ Ready │
///   └─────┘                └─────────┘ ◄───────── └───────┘
///                            │  ▲       dispatch      ▲
///          pool exhausted /  │  │                     │ release / send
///          empty mailbox     ▼  │                     │
///                         ┌─────────────┐             │
///                         │ Blocked*    │ ────────────┘
///                         └─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Registered but never dispatched.
    New,
    /// Waiting in the ready queue.
    Ready,
    /// Currently executing.
    Running,
    /// Waiting for a general-purpose memory block.
    BlockedOnResource,
    /// Waiting for a message.
    BlockedOnReceive,
    /// Waiting for a free envelope.
    BlockedOnEnvelope,
}

impl ProcState {
    /// Any of the blocked states.
    #[inline]
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            ProcState::BlockedOnResource | ProcState::BlockedOnReceive | ProcState::BlockedOnEnvelope
        )
    }
}

// ---------------------------------------------------------------------------
// Boot-time process description
// ---------------------------------------------------------------------------

/// Initialization table entry for one process.
pub struct ProcInit<K: 'static> {
    pub pid: Pid,
    pub priority: Priority,
    pub entry: ProcEntry<K>,
}

impl<K: 'static> Clone for ProcInit<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: 'static> Copy for ProcInit<K> {}

// ---------------------------------------------------------------------------
// Process Control Block
// ---------------------------------------------------------------------------

/// Process Control Block: per-process kernel metadata.
#[derive(Debug, Clone, Copy)]
pub struct Pcb {
    /// Unique process identifier (index in the process table).
    pub pid: Pid,

    /// Current priority.
    pub priority: Priority,

    /// Current execution state.
    pub state: ProcState,

    /// Whether an entry point was registered for this slot.
    pub registered: bool,

    /// Incoming messages, oldest first.
    pub mailbox: Mailbox,
}

impl Pcb {
    /// Unregistered slot. Used to initialize the static table.
    pub const EMPTY: Pcb = Pcb {
        pid: PID_NULL,
        priority: Priority::NULL,
        state: ProcState::New,
        registered: false,
        mailbox: Mailbox::new(),
    };

    /// Initialize the slot for a process that has not run yet.
    pub fn init(&mut self, pid: Pid, priority: Priority) {
        self.pid = pid;
        self.priority = priority;
        self.state = ProcState::New;
        self.registered = true;
        self.mailbox = Mailbox::new();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcb_initialization() {
        let mut pcb = Pcb::EMPTY;
        assert!(!pcb.registered);

        pcb.init(5, Priority::LOW);
        assert!(pcb.registered);
        assert_eq!(pcb.pid, 5);
        assert_eq!(pcb.state, ProcState::New);
        assert_eq!(pcb.priority, Priority::LOW);
        assert!(pcb.mailbox.is_empty());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::HIGH.is_higher_than(Priority::MEDIUM));
        assert!(Priority::LOWEST.is_higher_than(Priority::NULL));
        assert!(!Priority::LOW.is_higher_than(Priority::LOW));
        assert!(Priority::HIGH < Priority::LOWEST);
    }

    #[test]
    fn test_priority_ranges() {
        assert_eq!(Priority::from_level(2), Some(Priority::LOW));
        assert_eq!(Priority::from_level(NUM_PRIORITIES), None);
        assert!(Priority::LOWEST.is_assignable());
        assert!(!Priority::NULL.is_assignable());
    }

    #[test]
    fn test_blocked_states() {
        assert!(ProcState::BlockedOnReceive.is_blocked());
        assert!(ProcState::BlockedOnEnvelope.is_blocked());
        assert!(ProcState::BlockedOnResource.is_blocked());
        assert!(!ProcState::Ready.is_blocked());
        assert!(!ProcState::New.is_blocked());
    }
}
