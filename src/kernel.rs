//! # Kernel
//!
//! The public API of PostOS. A [`Kernel`] owns the scheduler state, the
//! atomic section guard and the port; every process receives a
//! `&'static Kernel<P>` and calls the API on it.
//!
//! Every method follows the same shape: do the bookkeeping inside one
//! guarded section, leave the section, and only then transfer control if
//! the bookkeeping decided on a switch. No guarded section is ever open
//! across a context switch.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset / main()
//!   ├─► Kernel::new(port)         ← static kernel instance
//!   ├─► kernel.create_process()   ← register processes (×N)
//!   └─► kernel.start()            ← add idle, queue all, dispatch
//!         └─► Port::launch()      ← first process begins at its entry
//! ```
//!
//! ## Interrupt Entry
//!
//! Interrupt handlers call [`Kernel::interrupt`] (or [`Kernel::handle_tick`]
//! for the periodic tick), which runs the handler body as one of the
//! privileged interrupt-context processes. Those never block and never
//! yield; a process they wake runs at the next yield point.

use core::cell::UnsafeCell;
use core::fmt;
use core::ptr;

use crate::arch::Port;
use crate::config::{is_privileged, NUM_PROCS, PID_NULL, PID_TIMER_IPROC};
use crate::error::{KernelError, SchedError};
use crate::memory::{BlockAddr, PoolKind};
use crate::message::Message;
use crate::process::{Pid, ProcEntry, ProcInit, ProcState, Priority};
use crate::scheduler::{AllocStep, Dispatch, Scheduler};
use crate::sync::AtomicGuard;

/// State touched only inside guarded sections.
struct KernelState<P: Port> {
    sched: Scheduler,
    /// Saved execution contexts, indexed by pid.
    contexts: [P::Context; NUM_PROCS],
    entries: [Option<ProcEntry<Kernel<P>>>; NUM_PROCS],
    started: bool,
}

/// A kernel instance bound to the port `P`.
pub struct Kernel<P: Port> {
    port: P,
    guard: AtomicGuard,
    state: UnsafeCell<KernelState<P>>,
}

// Safety: `state` is only accessed inside guarded sections, and only one
// process context runs at a time on the single core.
unsafe impl<P: Port> Sync for Kernel<P> {}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P) -> Self {
        Self {
            port,
            guard: AtomicGuard::new(),
            state: UnsafeCell::new(KernelState {
                sched: Scheduler::new(),
                contexts: [P::INITIAL_CONTEXT; NUM_PROCS],
                entries: [None; NUM_PROCS],
                started: false,
            }),
        }
    }

    /// The port this kernel runs on.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Run `f` on the kernel state inside a guarded section.
    ///
    /// `f` must not call back into the kernel: the state borrow it gets is
    /// exclusive only as long as no second one is created.
    fn critical<R>(&self, f: impl FnOnce(&mut KernelState<P>) -> R) -> R {
        self.guard.section(&self.port, || {
            // Safety: interrupts are masked and the borrow does not escape
            let state = unsafe { &mut *self.state.get() };
            f(state)
        })
    }

    fn context_ptr(&self, pid: Pid) -> *mut P::Context {
        let state = self.state.get();
        // Safety: no reference to the state is live outside `critical`
        unsafe { ptr::addr_of_mut!((*state).contexts[pid]) }
    }

    // -----------------------------------------------------------------------
    // Boot
    // -----------------------------------------------------------------------

    /// Register a process. Only allowed before [`Self::start`].
    pub fn create_process(&self, init: ProcInit<Self>) -> Result<(), KernelError> {
        let result = self.critical(|st| {
            if st.started {
                return Err(KernelError::NotPermitted);
            }
            st.sched.register(init.pid, init.priority)?;
            st.entries[init.pid] = Some(init.entry);
            Ok(())
        });
        match result {
            Ok(()) => log::debug!("registered pid {} at priority {}", init.pid, init.priority.0),
            Err(e) => log::warn!("cannot register pid {}: {}", init.pid, e),
        }
        result
    }

    /// Add the idle process if none was registered, queue every process,
    /// and dispatch the most urgent one.
    ///
    /// Never returns on bare metal. On the hosted port it returns once the
    /// simulation halts.
    pub fn start(&'static self) -> Result<(), KernelError> {
        let first = self.critical(|st| {
            if st.started {
                return Err(KernelError::NotPermitted);
            }
            if !st.sched.is_registered(PID_NULL) {
                st.sched.register(PID_NULL, Priority::NULL)?;
                st.entries[PID_NULL] = Some(null_process::<P>);
            }
            st.started = true;
            st.sched.boot();
            Ok(st.sched.reschedule())
        })?;
        log::info!("kernel started");
        self.dispatch(first);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Context transfer
    // -----------------------------------------------------------------------

    fn dispatch(&'static self, step: Result<Dispatch, SchedError>) {
        match step {
            Ok(dispatch) => self.transfer(dispatch),
            Err(e) => fatal(e),
        }
    }

    /// Perform the switch decided by the scheduler. Called outside any
    /// guarded section.
    fn transfer(&'static self, dispatch: Dispatch) {
        let Dispatch::Switch { from, to, first_run } = dispatch else {
            return;
        };

        if first_run {
            let Some(entry) = self.critical(|st| st.entries[to]) else {
                log::error!("pid {} has no entry point", to);
                fatal(SchedError::BadSwitchTarget);
            };
            let context = self.port.initial_context(to, entry, self);
            self.critical(|st| st.contexts[to] = context);
        }

        let to_ctx = self.context_ptr(to);
        // Safety: the context array lives as long as the kernel ('static)
        unsafe {
            match from {
                Some(from) => self
                    .port
                    .switch_context((from, self.context_ptr(from)), (to, to_ctx)),
                None => self.port.launch(to, to_ctx),
            }
        }
    }

    /// Yield if a strictly more urgent process is ready.
    fn preempt_if_needed(&'static self) {
        let step = self.critical(|st| st.sched.should_preempt().then(|| st.sched.reschedule()));
        if let Some(step) = step {
            self.dispatch(step);
        }
    }

    /// Give up the processor. The caller stays ready at the tail of its
    /// level; the most urgent ready process runs next.
    pub fn release_processor(&'static self) -> Result<(), KernelError> {
        let step = self.critical(|st| {
            if st.sched.current_is_privileged() {
                Err(KernelError::NotPermitted)
            } else {
                Ok(st.sched.reschedule())
            }
        })?;
        self.dispatch(step);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Memory
    // -----------------------------------------------------------------------

    /// Claim a slot of `kind`, blocking while the pool is exhausted.
    fn claim(&'static self, kind: PoolKind) -> Result<usize, KernelError> {
        loop {
            let step = self.critical(|st| match st.sched.try_allocate(kind)? {
                AllocStep::Granted(index) => Ok(Ok(index)),
                AllocStep::Blocked => Ok(Err(st.sched.reschedule())),
            })?;
            match step {
                Ok(index) => return Ok(index),
                Err(wait) => self.dispatch(wait),
            }
        }
    }

    /// Allocate a block from `kind`. Ordinary processes block until one is
    /// free; interrupt-context processes get [`KernelError::Unavailable`].
    pub fn allocate(&'static self, kind: PoolKind) -> Result<BlockAddr, KernelError> {
        let index = self.claim(kind)?;
        Ok(self.critical(|st| st.sched.addr_of(kind, index)))
    }

    /// Return a block to `kind`, waking its oldest most urgent waiter.
    pub fn release(&'static self, kind: PoolKind, addr: BlockAddr) -> Result<(), KernelError> {
        let woken = self.critical(|st| st.sched.release(kind, addr))?;
        if woken.is_some() {
            self.preempt_if_needed();
        }
        Ok(())
    }

    pub fn request_memory_block(&'static self) -> Result<BlockAddr, KernelError> {
        self.allocate(PoolKind::General)
    }

    pub fn release_memory_block(&'static self, addr: BlockAddr) -> Result<(), KernelError> {
        self.release(PoolKind::General, addr)
    }

    /// Copy bytes out of an allocated general block, starting at `offset`.
    pub fn read_block(&self, addr: BlockAddr, offset: usize, buf: &mut [u8]) -> Result<(), KernelError> {
        self.critical(|st| {
            let block = st.sched.block_mut(addr)?;
            let src = offset
                .checked_add(buf.len())
                .and_then(|end| block.0.get(offset..end))
                .ok_or(KernelError::InvalidAddress)?;
            buf.copy_from_slice(src);
            Ok(())
        })
    }

    /// Copy bytes into an allocated general block, starting at `offset`.
    pub fn write_block(&self, addr: BlockAddr, offset: usize, data: &[u8]) -> Result<(), KernelError> {
        self.critical(|st| {
            let block = st.sched.block_mut(addr)?;
            let dst = offset
                .checked_add(data.len())
                .and_then(|end| block.0.get_mut(offset..end))
                .ok_or(KernelError::InvalidAddress)?;
            dst.copy_from_slice(data);
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Check a destination and payload before an envelope is claimed.
    fn check_message(&self, dest: Pid, payload: BlockAddr) -> Result<(), KernelError> {
        let checked = self.critical(|st| {
            if dest == PID_TIMER_IPROC || !st.sched.is_message_target(dest) {
                return Err(KernelError::InvalidPid);
            }
            st.sched.block_mut(payload).map(|_| ())
        });
        if let Err(e) = checked {
            log::warn!("rejected message to pid {}: {}", dest, e);
        }
        checked
    }

    /// Send the block at `payload` to `dest`. Blocks while no envelope is
    /// free. The payload block now belongs to the receiver.
    pub fn send(&'static self, dest: Pid, payload: BlockAddr) -> Result<(), KernelError> {
        self.check_message(dest, payload)?;
        let envelope = self.claim(PoolKind::Envelope)?;
        let woken = self.critical(|st| {
            st.sched.stamp(envelope, dest, payload, 0);
            st.sched.post(envelope)
        });
        if woken {
            self.preempt_if_needed();
        }
        Ok(())
    }

    /// Send `payload` to `dest` once `delay` ticks have elapsed.
    pub fn delayed_send(&'static self, dest: Pid, payload: BlockAddr, delay: u32) -> Result<(), KernelError> {
        self.check_message(dest, payload)?;
        let envelope = self.claim(PoolKind::Envelope)?;
        self.critical(|st| {
            st.sched.stamp(envelope, dest, payload, delay);
            st.sched.post_delayed(envelope);
        });
        log::debug!("delayed send to pid {} in {} ticks", dest, delay);
        Ok(())
    }

    /// Wait for the next message. Interrupt-context processes get
    /// [`KernelError::WouldBlock`] and must use
    /// [`Self::receive_nonblocking`].
    pub fn receive(&'static self) -> Result<Message, KernelError> {
        loop {
            let step = self.critical(|st| {
                let pid = match st.sched.current() {
                    Some(pid) if !is_privileged(pid) => pid,
                    _ => return Err(KernelError::WouldBlock),
                };
                match st.sched.take_message(pid) {
                    Ok(Some(msg)) => Ok(Ok(msg)),
                    Ok(None) => {
                        st.sched.block_on_receive();
                        Ok(Err(st.sched.reschedule()))
                    }
                    Err(e) => Ok(Err(Err(e))),
                }
            })?;
            match step {
                Ok(msg) => {
                    self.preempt_if_needed();
                    return Ok(msg);
                }
                Err(wait) => self.dispatch(wait),
            }
        }
    }

    /// Take the next message if there is one. Never blocks.
    pub fn receive_nonblocking(&'static self) -> Option<Message> {
        let taken = self.critical(|st| match st.sched.current() {
            Some(pid) => st.sched.take_message(pid),
            None => Ok(None),
        });
        let msg = taken.unwrap_or_else(|e| fatal(e))?;
        self.preempt_if_needed();
        Some(msg)
    }

    // -----------------------------------------------------------------------
    // Priorities
    // -----------------------------------------------------------------------

    pub fn get_priority(&self, pid: Pid) -> Result<Priority, KernelError> {
        self.critical(|st| st.sched.priority_of(pid))
    }

    /// Change the priority of `pid`, yielding if that makes a ready
    /// process more urgent than the caller.
    pub fn set_priority(&'static self, pid: Pid, priority: Priority) -> Result<(), KernelError> {
        self.critical(|st| st.sched.set_priority(pid, priority))
            .inspect_err(|e| log::warn!("set_priority({}, {}) rejected: {}", pid, priority.0, e))?;
        self.preempt_if_needed();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Interrupt entry
    // -----------------------------------------------------------------------

    /// Run `f` as the interrupt-context process `pid`, with interrupts
    /// masked for its whole duration.
    pub fn interrupt<R>(&'static self, pid: Pid, f: impl FnOnce(&'static Self) -> R) -> Result<R, KernelError> {
        if !is_privileged(pid) {
            return Err(KernelError::InvalidPid);
        }
        self.guard.enter(&self.port);
        let interrupted = self.critical(|st| st.sched.enter_interrupt(pid));
        let ret = f(self);
        self.critical(|st| st.sched.leave_interrupt(interrupted));
        self.guard.exit(&self.port);
        Ok(ret)
    }

    /// Periodic tick entry. Returns the number of delayed messages
    /// delivered on this tick.
    pub fn handle_tick(&'static self) -> usize {
        self.interrupt(PID_TIMER_IPROC, |k| k.critical(|st| st.sched.timer_tick()))
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn current_pid(&self) -> Option<Pid> {
        self.critical(|st| st.sched.current())
    }

    /// Ticks since boot.
    pub fn ticks(&self) -> u64 {
        self.critical(|st| st.sched.timer.now())
    }

    pub fn state_of(&self, pid: Pid) -> Option<ProcState> {
        self.critical(|st| st.sched.state_of(pid))
    }

    pub fn free_blocks(&self, kind: PoolKind) -> usize {
        self.critical(|st| st.sched.free_count(kind))
    }

    pub fn mailbox_len(&self, pid: Pid) -> usize {
        self.critical(|st| st.sched.mailbox_len(pid))
    }

    /// Delayed messages accepted but not yet delivered.
    pub fn pending_delayed(&self) -> usize {
        self.critical(|st| st.sched.timer.len() + st.sched.mailbox_len(PID_TIMER_IPROC))
    }

    pub fn context_switches(&self) -> u32 {
        self.critical(|st| st.sched.context_switches)
    }
}

/// Corrupted kernel state: report and halt.
fn fatal(e: impl fmt::Display) -> ! {
    log::error!("kernel invariant violated: {}", e);
    panic!("kernel invariant violated: {}", e)
}

/// The idle process: always ready, yields on every pass. It only runs as
/// an ordinary process, so a refused yield means the state is corrupt.
fn null_process<P: Port>(kernel: &'static Kernel<P>) {
    loop {
        kernel.port().idle();
        if let Err(e) = kernel.release_processor() {
            fatal(e);
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario tests (hosted port)
// ---------------------------------------------------------------------------
