//! # Scheduler
//!
//! All shared kernel state in one object: the process table, the ready and
//! blocked queues, both memory pools, the mailboxes, and the delayed
//! delivery list. Every method here is pure bookkeeping on `&mut self`; the
//! kernel layer calls them inside an atomic section and performs the
//! actual context transfer afterwards.
//!
//! ## Scheduling Algorithm
//!
//! 1. **Yield**: the running process goes to the tail of its ready level
//!    unless it has just blocked
//! 2. **Select**: take the head of the most urgent non-empty ready level
//! 3. **Switch**: the old process becomes READY (blocked states are kept),
//!    the new one RUNNING; a NEW process gets a fresh initial context
//!
//! The idle process at the last level is always ready, so selection only
//! fails when the queues have been corrupted.
//!
//! ## Preemption
//!
//! After an operation readies another process, an ordinary caller yields
//! if and only if the best ready priority is strictly higher than its own.
//! Interrupt-context callers never yield.

use crate::config::{
    is_privileged, NUM_ENVELOPES, NUM_MEM_BLOCKS, NUM_PROCS, PID_NULL, PID_TIMER_IPROC,
};
use crate::error::{KernelError, SchedError};
use crate::memory::{BlockAddr, BlockPool, MemBlock, PoolKind};
use crate::message::{Envelope, Message};
use crate::process::{Pcb, Pid, Priority, ProcState};
use crate::queue::PriorityQueue;
use crate::timer::DelayQueue;

/// Outcome of a scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The running process was selected again; nothing to transfer.
    Stay,
    /// Control moves from `from` (if any live context) to `to`.
    Switch {
        from: Option<Pid>,
        to: Pid,
        /// `to` has never run and needs an initial context.
        first_run: bool,
    },
}

/// Outcome of one allocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStep {
    /// Slot index claimed for the caller.
    Granted(usize),
    /// The pool is exhausted; the caller is now blocked and queued.
    Blocked,
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central kernel state.
pub struct Scheduler {
    /// Process table, indexed by pid.
    pub pcbs: [Pcb; NUM_PROCS],

    /// The process whose context is live. `None` before boot.
    current: Option<Pid>,

    ready: PriorityQueue,
    blocked_memory: PriorityQueue,
    blocked_envelope: PriorityQueue,

    pub memory: BlockPool<MemBlock, NUM_MEM_BLOCKS>,
    pub envelopes: BlockPool<Envelope, NUM_ENVELOPES>,

    /// Pending delayed messages and the tick counter.
    pub timer: DelayQueue,

    /// Number of context transfers performed.
    pub context_switches: u32,
}

impl Scheduler {
    pub const fn new() -> Self {
        let mut pcbs = [Pcb::EMPTY; NUM_PROCS];
        let mut pid = 0;
        while pid < NUM_PROCS {
            pcbs[pid].pid = pid;
            if is_privileged(pid) {
                pcbs[pid].priority = Priority::HIGH;
            }
            pid += 1;
        }

        Self {
            pcbs,
            current: None,
            ready: PriorityQueue::new(),
            blocked_memory: PriorityQueue::new(),
            blocked_envelope: PriorityQueue::new(),
            memory: BlockPool::new([MemBlock::ZERO; NUM_MEM_BLOCKS]),
            envelopes: BlockPool::new([Envelope::EMPTY; NUM_ENVELOPES]),
            timer: DelayQueue::new(),
            context_switches: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Process table
    // -----------------------------------------------------------------------

    /// Register a process at boot.
    pub fn register(&mut self, pid: Pid, priority: Priority) -> Result<(), KernelError> {
        if pid >= NUM_PROCS || is_privileged(pid) {
            return Err(KernelError::InvalidPid);
        }
        let idle = pid == PID_NULL;
        if idle != (priority == Priority::NULL) {
            return Err(KernelError::InvalidPriority);
        }
        if self.pcbs[pid].registered {
            return Err(KernelError::AlreadyRegistered);
        }
        self.pcbs[pid].init(pid, priority);
        Ok(())
    }

    /// Queue every registered process for its first dispatch.
    pub fn boot(&mut self) {
        for pid in 0..NUM_PROCS {
            if self.pcbs[pid].registered && self.pcbs[pid].state == ProcState::New {
                self.ready.enqueue(pid, self.pcbs[pid].priority);
            }
        }
    }

    #[inline]
    pub fn is_registered(&self, pid: Pid) -> bool {
        pid < NUM_PROCS && self.pcbs[pid].registered
    }

    /// Whether `pid` owns a mailbox that can receive messages.
    #[inline]
    pub fn is_message_target(&self, pid: Pid) -> bool {
        self.is_registered(pid) || is_privileged(pid)
    }

    #[inline]
    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    /// Whether the caller must not block: an interrupt-context process, or
    /// boot code running before the first dispatch.
    #[inline]
    pub fn current_is_privileged(&self) -> bool {
        self.current.map_or(true, is_privileged)
    }

    pub fn state_of(&self, pid: Pid) -> Option<ProcState> {
        self.is_message_target(pid).then(|| self.pcbs[pid].state)
    }

    pub fn priority_of(&self, pid: Pid) -> Result<Priority, KernelError> {
        if self.is_message_target(pid) {
            Ok(self.pcbs[pid].priority)
        } else {
            Err(KernelError::InvalidPid)
        }
    }

    // -----------------------------------------------------------------------
    // Queues
    // -----------------------------------------------------------------------

    pub fn enqueue_ready(&mut self, pid: Pid) {
        self.ready.enqueue(pid, self.pcbs[pid].priority);
    }

    pub fn pop_ready(&mut self) -> Option<Pid> {
        self.ready.pop()
    }

    fn blocked_queue(&mut self, kind: PoolKind) -> &mut PriorityQueue {
        match kind {
            PoolKind::General => &mut self.blocked_memory,
            PoolKind::Envelope => &mut self.blocked_envelope,
        }
    }

    pub fn enqueue_blocked(&mut self, kind: PoolKind, pid: Pid) {
        let priority = self.pcbs[pid].priority;
        self.blocked_queue(kind).enqueue(pid, priority);
    }

    /// Oldest process waiting on `kind`, most urgent level first.
    pub fn pop_blocked(&mut self, kind: PoolKind) -> Option<Pid> {
        self.blocked_queue(kind).pop()
    }

    pub fn ready_level_of(&self, pid: Pid) -> Option<Priority> {
        self.ready.level_of(pid)
    }

    pub fn blocked_level_of(&self, pid: Pid) -> Option<Priority> {
        self.blocked_memory
            .level_of(pid)
            .or_else(|| self.blocked_envelope.level_of(pid))
    }

    /// Make a blocked process runnable again.
    fn wake(&mut self, pid: Pid) {
        log::debug!("pid {} unblocked from {:?}", pid, self.pcbs[pid].state);
        self.pcbs[pid].state = ProcState::Ready;
        self.enqueue_ready(pid);
    }

    // -----------------------------------------------------------------------
    // Scheduling and context switch bookkeeping
    // -----------------------------------------------------------------------

    /// Pick the next process to run.
    #[inline]
    pub fn scheduler(&mut self) -> Option<Pid> {
        self.pop_ready()
    }

    /// The bookkeeping half of `release_processor`: requeue the caller if
    /// it is still runnable, select the next process, and switch states.
    pub fn reschedule(&mut self) -> Result<Dispatch, SchedError> {
        let old = self.current;
        if let Some(pid) = old {
            if !self.pcbs[pid].state.is_blocked() {
                self.enqueue_ready(pid);
            }
        }
        let new = self.scheduler().ok_or(SchedError::NoRunnable)?;
        self.context_switch(old, new)
    }

    /// Move the running role from `old` to `new`.
    ///
    /// On a target that is neither NEW nor READY, `old` stays the running
    /// process and the corruption is reported.
    pub fn context_switch(&mut self, old: Option<Pid>, new: Pid) -> Result<Dispatch, SchedError> {
        if old == Some(new) {
            self.pcbs[new].state = ProcState::Running;
            return Ok(Dispatch::Stay);
        }

        let first_run = match self.pcbs[new].state {
            ProcState::New => true,
            ProcState::Ready => false,
            state => {
                log::error!("switch target pid {} is {:?}", new, state);
                self.current = old;
                return Err(SchedError::BadSwitchTarget);
            }
        };

        if let Some(old) = old {
            // A blocked process keeps its blocked state
            if self.pcbs[old].state == ProcState::Running {
                self.pcbs[old].state = ProcState::Ready;
            }
        }
        self.pcbs[new].state = ProcState::Running;
        self.current = Some(new);
        self.context_switches = self.context_switches.wrapping_add(1);
        log::trace!("dispatch {:?} -> {} (first run: {})", old, new, first_run);

        Ok(Dispatch::Switch {
            from: old,
            to: new,
            first_run,
        })
    }

    /// Whether a ready process strictly outranks the caller.
    pub fn should_preempt(&self) -> bool {
        match self.current {
            Some(pid) if !is_privileged(pid) => self
                .ready
                .peek_priority()
                .is_some_and(|best| best.is_higher_than(self.pcbs[pid].priority)),
            _ => false,
        }
    }

    /// Change the priority of `pid`, moving it to the new level of
    /// whichever queue holds it.
    pub fn set_priority(&mut self, pid: Pid, priority: Priority) -> Result<(), KernelError> {
        if !self.is_registered(pid) || pid == PID_NULL {
            return Err(KernelError::InvalidPid);
        }
        if !priority.is_assignable() {
            return Err(KernelError::InvalidPriority);
        }
        if self.pcbs[pid].priority == priority {
            return Ok(());
        }

        let moved = self.ready.relocate(pid, priority)
            || self.blocked_memory.relocate(pid, priority)
            || self.blocked_envelope.relocate(pid, priority);
        log::debug!(
            "pid {} priority {} -> {} (queued: {})",
            pid,
            self.pcbs[pid].priority.0,
            priority.0,
            moved
        );
        self.pcbs[pid].priority = priority;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Interrupt context
    // -----------------------------------------------------------------------

    /// Make the interrupt-context process `pid` current. Returns the
    /// interrupted process, to be restored by [`Self::leave_interrupt`].
    pub fn enter_interrupt(&mut self, pid: Pid) -> Option<Pid> {
        core::mem::replace(&mut self.current, Some(pid))
    }

    pub fn leave_interrupt(&mut self, interrupted: Option<Pid>) {
        self.current = interrupted;
    }

    // -----------------------------------------------------------------------
    // Memory pools
    // -----------------------------------------------------------------------

    /// One allocation attempt on behalf of the current process.
    ///
    /// On exhaustion an ordinary caller is marked blocked and queued; an
    /// interrupt-context caller gets [`KernelError::Unavailable`].
    pub fn try_allocate(&mut self, kind: PoolKind) -> Result<AllocStep, KernelError> {
        let owner = self.current.unwrap_or(PID_NULL);
        let granted = match kind {
            PoolKind::General => self.memory.try_allocate(owner),
            PoolKind::Envelope => self.envelopes.try_allocate(owner),
        };
        if let Some(index) = granted {
            return Ok(AllocStep::Granted(index));
        }
        if self.current_is_privileged() {
            log::warn!("{:?} pool exhausted in interrupt context", kind);
            return Err(KernelError::Unavailable);
        }

        self.pcbs[owner].state = match kind {
            PoolKind::General => ProcState::BlockedOnResource,
            PoolKind::Envelope => ProcState::BlockedOnEnvelope,
        };
        self.enqueue_blocked(kind, owner);
        log::debug!("pid {} blocked on {:?} pool", owner, kind);
        Ok(AllocStep::Blocked)
    }

    /// Address of a claimed slot.
    pub fn addr_of(&self, kind: PoolKind, index: usize) -> BlockAddr {
        match kind {
            PoolKind::General => self.memory.addr_of(index),
            PoolKind::Envelope => self.envelopes.addr_of(index),
        }
    }

    /// Free the block at `addr` and wake the oldest waiter on its pool.
    /// Returns the woken pid.
    pub fn release(&mut self, kind: PoolKind, addr: BlockAddr) -> Result<Option<Pid>, KernelError> {
        let freed = match kind {
            PoolKind::General => self.memory.free(addr),
            PoolKind::Envelope => self.envelopes.free(addr),
        };
        if let Err(e) = freed {
            log::warn!("rejected release of {:#x} to {:?} pool: {}", addr.as_usize(), kind, e);
            return Err(e);
        }
        Ok(self.wake_waiter(kind))
    }

    /// Return a dequeued envelope to its pool. A queued envelope that is
    /// already free means the mailbox links are corrupt.
    fn release_envelope(&mut self, index: usize) -> Result<Option<Pid>, SchedError> {
        if let Err(e) = self.envelopes.free_index(index) {
            log::error!("envelope {} dequeued while free: {}", index, e);
            return Err(SchedError::StrayEnvelope);
        }
        Ok(self.wake_waiter(PoolKind::Envelope))
    }

    fn wake_waiter(&mut self, kind: PoolKind) -> Option<Pid> {
        let pid = self.pop_blocked(kind)?;
        self.wake(pid);
        Some(pid)
    }

    pub fn free_count(&self, kind: PoolKind) -> usize {
        match kind {
            PoolKind::General => self.memory.free_count(),
            PoolKind::Envelope => self.envelopes.free_count(),
        }
    }

    /// Contents of an allocated general-purpose block.
    pub fn block_mut(&mut self, addr: BlockAddr) -> Result<&mut MemBlock, KernelError> {
        let index = self.memory.index_of(addr)?;
        if !self.memory.is_allocated(index) {
            return Err(KernelError::NotAllocated);
        }
        Ok(self.memory.get_mut(index))
    }

    // -----------------------------------------------------------------------
    // Mailboxes
    // -----------------------------------------------------------------------

    /// Fill a claimed envelope.
    pub fn stamp(&mut self, index: usize, dest: Pid, payload: BlockAddr, delay: u32) {
        let sender = self.current.unwrap_or(PID_NULL);
        *self.envelopes.get_mut(index) = Envelope {
            payload,
            next: None,
            dest,
            sender,
            delay,
            deadline: 0,
        };
    }

    /// Append envelope `index` to the mailbox of its destination, waking a
    /// receive-blocked destination. Returns `true` if it was woken.
    pub fn post(&mut self, index: usize) -> bool {
        let dest = self.envelopes.get(index).dest;
        self.pcbs[dest].mailbox.push(&mut self.envelopes, index);
        if self.pcbs[dest].state == ProcState::BlockedOnReceive {
            self.wake(dest);
            true
        } else {
            false
        }
    }

    /// Hand a delayed envelope to the timer i-process.
    pub fn post_delayed(&mut self, index: usize) {
        self.pcbs[PID_TIMER_IPROC].mailbox.push(&mut self.envelopes, index);
    }

    /// Pop the oldest message of `pid` and return its envelope to the pool,
    /// waking a process blocked on the envelope pool.
    pub fn take_message(&mut self, pid: Pid) -> Result<Option<Message>, SchedError> {
        let Some(index) = self.pcbs[pid].mailbox.pop(&mut self.envelopes) else {
            return Ok(None);
        };
        let env = *self.envelopes.get(index);
        self.release_envelope(index)?;
        Ok(Some(Message {
            sender: env.sender,
            payload: env.payload,
        }))
    }

    /// Mark the current process as waiting for a message.
    pub fn block_on_receive(&mut self) {
        if let Some(pid) = self.current {
            self.pcbs[pid].state = ProcState::BlockedOnReceive;
            log::debug!("pid {} blocked on receive", pid);
        }
    }

    pub fn mailbox_len(&self, pid: Pid) -> usize {
        if pid < NUM_PROCS {
            self.pcbs[pid].mailbox.len()
        } else {
            0
        }
    }

    // -----------------------------------------------------------------------
    // Delayed delivery
    // -----------------------------------------------------------------------

    /// One tick of the timer i-process: move everything in the timer's
    /// mailbox onto the pending list (deadlines are relative to the tick the
    /// message was sent in), advance time, then dispatch every pending
    /// envelope whose deadline has been reached. Returns the number of
    /// messages delivered.
    pub fn timer_tick(&mut self) -> usize {
        while let Some(index) = self.pcbs[PID_TIMER_IPROC].mailbox.pop(&mut self.envelopes) {
            self.timer.insert(&mut self.envelopes, index);
        }

        self.timer.advance();

        let mut delivered = 0;
        while let Some(index) = self.timer.pop_expired(&mut self.envelopes) {
            log::debug!(
                "tick {}: delivering delayed envelope {} to pid {}",
                self.timer.now(),
                index,
                self.envelopes.get(index).dest
            );
            self.post(index);
            delivered += 1;
        }
        delivered
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::{PID_UART_IPROC, PID_USER_FIRST};
    use std::boxed::Box;

    /// A booted scheduler with the idle process and `procs` registered,
    /// and the first process dispatched.
    fn booted(procs: &[(Pid, Priority)]) -> Box<Scheduler> {
        let mut s = Box::new(Scheduler::new());
        s.register(PID_NULL, Priority::NULL).unwrap();
        for &(pid, prio) in procs {
            s.register(pid, prio).unwrap();
        }
        s.boot();
        s.reschedule().unwrap();
        s
    }

    fn switch_to(d: Dispatch) -> Option<Pid> {
        match d {
            Dispatch::Switch { to, .. } => Some(to),
            Dispatch::Stay => None,
        }
    }

    #[test]
    fn test_register_validation() {
        let mut s = Box::new(Scheduler::new());
        assert_eq!(s.register(PID_TIMER_IPROC, Priority::HIGH), Err(KernelError::InvalidPid));
        assert_eq!(s.register(NUM_PROCS, Priority::HIGH), Err(KernelError::InvalidPid));
        assert_eq!(s.register(1, Priority::NULL), Err(KernelError::InvalidPriority));
        assert_eq!(s.register(PID_NULL, Priority::LOW), Err(KernelError::InvalidPriority));
        assert_eq!(s.register(1, Priority::LOW), Ok(()));
        assert_eq!(s.register(1, Priority::LOW), Err(KernelError::AlreadyRegistered));
    }

    #[test]
    fn test_boot_dispatches_highest_priority() {
        let s = booted(&[(1, Priority::LOW), (2, Priority::HIGH), (3, Priority::LOW)]);
        assert_eq!(s.current(), Some(2));
        assert_eq!(s.pcbs[2].state, ProcState::Running);
        assert_eq!(s.pcbs[1].state, ProcState::New);
    }

    #[test]
    fn test_first_dispatch_is_fresh() {
        let mut s = Box::new(Scheduler::new());
        s.register(PID_NULL, Priority::NULL).unwrap();
        s.boot();
        assert_eq!(
            s.reschedule(),
            Ok(Dispatch::Switch {
                from: None,
                to: PID_NULL,
                first_run: true
            })
        );
    }

    #[test]
    fn test_round_robin_within_level() {
        let mut s = booted(&[(1, Priority::LOW), (2, Priority::LOW), (3, Priority::LOW)]);
        assert_eq!(s.current(), Some(1));

        assert_eq!(switch_to(s.reschedule().unwrap()), Some(2));
        assert_eq!(s.pcbs[1].state, ProcState::Ready);
        assert_eq!(switch_to(s.reschedule().unwrap()), Some(3));
        assert_eq!(
            s.reschedule(),
            Ok(Dispatch::Switch {
                from: Some(3),
                to: 1,
                first_run: false
            })
        );
    }

    #[test]
    fn test_sole_runnable_process_stays() {
        let mut s = booted(&[(1, Priority::HIGH)]);
        assert_eq!(s.reschedule(), Ok(Dispatch::Stay));
        assert_eq!(s.current(), Some(1));
        assert_eq!(s.pcbs[1].state, ProcState::Running);
    }

    #[test]
    fn test_idle_runs_when_everything_blocks() {
        let mut s = booted(&[(1, Priority::HIGH)]);
        s.block_on_receive();
        assert_eq!(switch_to(s.reschedule().unwrap()), Some(PID_NULL));
        assert_eq!(s.pcbs[1].state, ProcState::BlockedOnReceive);
        assert_eq!(s.ready_level_of(1), None);
    }

    #[test]
    fn test_no_runnable_is_reported() {
        let mut s = Box::new(Scheduler::new());
        s.register(1, Priority::HIGH).unwrap();
        s.boot();
        s.reschedule().unwrap();
        s.block_on_receive();
        assert_eq!(s.reschedule(), Err(SchedError::NoRunnable));
    }

    #[test]
    fn test_bad_switch_target_keeps_old_running() {
        let mut s = booted(&[(1, Priority::HIGH), (2, Priority::LOW)]);
        s.pcbs[2].state = ProcState::BlockedOnReceive;
        assert_eq!(s.context_switch(Some(1), 2), Err(SchedError::BadSwitchTarget));
        assert_eq!(s.current(), Some(1));
        assert_eq!(s.pcbs[1].state, ProcState::Running);
    }

    #[test]
    fn test_allocate_blocks_when_exhausted() {
        let mut s = booted(&[(1, Priority::MEDIUM)]);
        for _ in 0..NUM_MEM_BLOCKS {
            assert!(matches!(s.try_allocate(PoolKind::General), Ok(AllocStep::Granted(_))));
        }
        assert_eq!(s.try_allocate(PoolKind::General), Ok(AllocStep::Blocked));
        assert_eq!(s.pcbs[1].state, ProcState::BlockedOnResource);
        assert_eq!(s.blocked_level_of(1), Some(Priority::MEDIUM));
        assert_eq!(s.ready_level_of(1), None);

        // Blocked callers are not requeued on yield
        assert_eq!(switch_to(s.reschedule().unwrap()), Some(PID_NULL));

        let addr = s.memory.addr_of(7);
        assert_eq!(s.release(PoolKind::General, addr), Ok(Some(1)));
        assert_eq!(s.pcbs[1].state, ProcState::Ready);
        assert_eq!(s.ready_level_of(1), Some(Priority::MEDIUM));
        assert_eq!(s.blocked_level_of(1), None);
    }

    #[test]
    fn test_interrupt_context_gets_unavailable() {
        let mut s = booted(&[(1, Priority::MEDIUM)]);
        for _ in 0..NUM_ENVELOPES {
            s.try_allocate(PoolKind::Envelope).unwrap();
        }
        let interrupted = s.enter_interrupt(PID_UART_IPROC);
        assert_eq!(s.try_allocate(PoolKind::Envelope), Err(KernelError::Unavailable));
        assert_eq!(s.pcbs[PID_UART_IPROC].state, ProcState::New);
        s.leave_interrupt(interrupted);
        assert_eq!(s.current(), Some(1));
    }

    #[test]
    fn test_release_wakes_most_urgent_waiter_first() {
        let mut s = booted(&[(1, Priority::LOWEST), (2, Priority::MEDIUM), (3, Priority::LOWEST)]);
        for _ in 0..NUM_MEM_BLOCKS {
            s.try_allocate(PoolKind::General).unwrap();
        }
        // 2 runs first, then 1 and 3 block in that order
        assert_eq!(s.try_allocate(PoolKind::General), Ok(AllocStep::Blocked));
        s.reschedule().unwrap();
        assert_eq!(s.current(), Some(1));
        assert_eq!(s.try_allocate(PoolKind::General), Ok(AllocStep::Blocked));
        s.reschedule().unwrap();
        assert_eq!(s.current(), Some(3));
        assert_eq!(s.try_allocate(PoolKind::General), Ok(AllocStep::Blocked));

        let a0 = s.memory.addr_of(0);
        let a1 = s.memory.addr_of(1);
        let a2 = s.memory.addr_of(2);
        assert_eq!(s.release(PoolKind::General, a0), Ok(Some(2)));
        assert_eq!(s.release(PoolKind::General, a1), Ok(Some(1)));
        assert_eq!(s.release(PoolKind::General, a2), Ok(Some(3)));
    }

    #[test]
    fn test_invalid_release_keeps_waiters_blocked() {
        let mut s = booted(&[(1, Priority::MEDIUM)]);
        let Ok(AllocStep::Granted(i)) = s.try_allocate(PoolKind::General) else {
            panic!("allocation failed");
        };
        let addr = s.memory.addr_of(i);
        assert_eq!(s.release(PoolKind::General, addr), Ok(None));
        assert_eq!(s.release(PoolKind::General, addr), Err(KernelError::DoubleRelease));
        assert_eq!(
            s.release(PoolKind::General, addr.offset(3)),
            Err(KernelError::InvalidAddress)
        );
        // An envelope-pool address is foreign to the general pool
        let env = s.envelopes.addr_of(0);
        assert_eq!(s.release(PoolKind::General, env), Err(KernelError::InvalidAddress));
        assert_eq!(s.free_count(PoolKind::General), NUM_MEM_BLOCKS);
    }

    #[test]
    fn test_send_blocks_on_envelope_until_message_taken() {
        let mut s = booted(&[(1, Priority::HIGH), (2, Priority::LOW)]);
        assert_eq!(s.current(), Some(1));
        let payload = s.memory.addr_of(0);
        for _ in 0..NUM_ENVELOPES {
            let Ok(AllocStep::Granted(env)) = s.try_allocate(PoolKind::Envelope) else {
                panic!("no envelope");
            };
            s.stamp(env, 2, payload, 0);
            assert!(!s.post(env));
        }
        assert_eq!(s.try_allocate(PoolKind::Envelope), Ok(AllocStep::Blocked));
        assert_eq!(s.pcbs[1].state, ProcState::BlockedOnEnvelope);
        assert_eq!(s.blocked_level_of(1), Some(Priority::HIGH));
        assert_eq!(s.free_count(PoolKind::Envelope), 0);

        assert_eq!(switch_to(s.reschedule().unwrap()), Some(2));
        let msg = s.take_message(2).unwrap().unwrap();
        assert_eq!(msg.sender, 1);
        assert_eq!(s.pcbs[1].state, ProcState::Ready);
        assert_eq!(s.blocked_level_of(1), None);
        assert!(s.should_preempt());

        assert_eq!(switch_to(s.reschedule().unwrap()), Some(1));
        assert!(matches!(s.try_allocate(PoolKind::Envelope), Ok(AllocStep::Granted(_))));
    }

    #[test]
    fn test_free_envelope_in_mailbox_is_reported() {
        let mut s = booted(&[(1, Priority::LOW)]);
        s.pcbs[1].mailbox.push(&mut s.envelopes, 3);
        assert_eq!(s.take_message(1), Err(SchedError::StrayEnvelope));
        assert_eq!(s.free_count(PoolKind::Envelope), NUM_ENVELOPES);
    }

    #[test]
    fn test_free_block_contents_are_not_accessible() {
        let mut s = booted(&[(1, Priority::LOW)]);
        let addr = s.memory.addr_of(5);
        assert_eq!(s.block_mut(addr).err(), Some(KernelError::NotAllocated));
        assert_eq!(s.block_mut(addr.offset(1)).err(), Some(KernelError::InvalidAddress));
    }

    #[test]
    fn test_post_wakes_receive_blocked_destination() {
        let mut s = booted(&[(1, Priority::LOW), (2, Priority::MEDIUM)]);
        // 2 runs first and blocks on its empty mailbox
        assert_eq!(s.current(), Some(2));
        s.block_on_receive();
        s.reschedule().unwrap();
        assert_eq!(s.current(), Some(1));

        let Ok(AllocStep::Granted(env)) = s.try_allocate(PoolKind::Envelope) else {
            panic!("no envelope");
        };
        let payload = s.memory.addr_of(4);
        s.stamp(env, 2, payload, 0);
        assert!(s.post(env));
        assert_eq!(s.pcbs[2].state, ProcState::Ready);
        assert!(s.should_preempt());

        s.reschedule().unwrap();
        assert_eq!(s.current(), Some(2));
        assert_eq!(s.take_message(2), Ok(Some(Message { sender: 1, payload })));
        assert_eq!(s.take_message(2), Ok(None));
        assert_eq!(s.free_count(PoolKind::Envelope), NUM_ENVELOPES);
    }

    #[test]
    fn test_no_preempt_for_equal_priority() {
        let s = booted(&[(1, Priority::LOW), (2, Priority::LOW)]);
        assert_eq!(s.current(), Some(1));
        assert!(!s.should_preempt());
    }

    #[test]
    fn test_set_priority_relocates_ready_process() {
        let mut s = booted(&[(1, Priority::MEDIUM), (5, Priority::LOWEST), (6, Priority::HIGH)]);
        assert_eq!(s.current(), Some(6));
        s.block_on_receive();
        s.reschedule().unwrap();
        assert_eq!(s.current(), Some(1));

        assert_eq!(s.ready_level_of(5), Some(Priority::LOWEST));
        s.set_priority(5, Priority::HIGH).unwrap();
        assert_eq!(s.ready_level_of(5), Some(Priority::HIGH));
        assert_eq!(s.pcbs[5].priority, Priority::HIGH);
        assert!(s.should_preempt());
        assert_eq!(switch_to(s.reschedule().unwrap()), Some(5));
    }

    #[test]
    fn test_set_priority_relocates_blocked_process() {
        let mut s = booted(&[(1, Priority::LOW), (2, Priority::LOWEST)]);
        for _ in 0..NUM_MEM_BLOCKS {
            s.try_allocate(PoolKind::General).unwrap();
        }
        s.try_allocate(PoolKind::General).unwrap();
        s.set_priority(1, Priority::MEDIUM).unwrap();
        assert_eq!(s.blocked_level_of(1), Some(Priority::MEDIUM));
        assert_eq!(s.ready_level_of(1), None);
    }

    #[test]
    fn test_set_priority_validation() {
        let mut s = booted(&[(PID_USER_FIRST, Priority::LOW)]);
        assert_eq!(s.set_priority(PID_NULL, Priority::LOW), Err(KernelError::InvalidPid));
        assert_eq!(s.set_priority(9, Priority::LOW), Err(KernelError::InvalidPid));
        assert_eq!(
            s.set_priority(PID_USER_FIRST, Priority::NULL),
            Err(KernelError::InvalidPriority)
        );
        assert_eq!(s.set_priority(PID_USER_FIRST, Priority::LOW), Ok(()));
    }

    #[test]
    fn test_timer_tick_delivers_in_deadline_order() {
        let mut s = booted(&[(1, Priority::LOW), (2, Priority::MEDIUM)]);
        assert_eq!(s.current(), Some(2));
        s.block_on_receive();
        s.reschedule().unwrap();

        // pid 1 queues two delayed messages for pid 2, later one first
        for (delay, block) in [(5, 0), (2, 1)] {
            let Ok(AllocStep::Granted(env)) = s.try_allocate(PoolKind::Envelope) else {
                panic!("no envelope");
            };
            let payload = s.memory.addr_of(block);
            s.stamp(env, 2, payload, delay);
            s.post_delayed(env);
        }
        assert_eq!(s.mailbox_len(PID_TIMER_IPROC), 2);

        let interrupted = s.enter_interrupt(PID_TIMER_IPROC);
        assert_eq!(s.timer_tick(), 0);
        assert_eq!(s.mailbox_len(PID_TIMER_IPROC), 0);
        assert_eq!(s.timer.len(), 2);
        assert_eq!(s.timer_tick(), 1);
        s.leave_interrupt(interrupted);

        assert_eq!(s.pcbs[2].state, ProcState::Ready);
        assert_eq!(s.mailbox_len(2), 1);
        let first = s.take_message(2).unwrap().unwrap();
        assert_eq!(first.payload, s.memory.addr_of(1));
        assert_eq!(first.sender, 1);

        let interrupted = s.enter_interrupt(PID_TIMER_IPROC);
        for _ in 0..2 {
            assert_eq!(s.timer_tick(), 0);
        }
        assert_eq!(s.timer_tick(), 1);
        s.leave_interrupt(interrupted);
        assert_eq!(s.take_message(2).unwrap().unwrap().payload, s.memory.addr_of(0));
    }
}
