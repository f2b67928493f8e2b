//! # Hosted Port
//!
//! Runs the kernel on a desktop OS for simulation and tests. Every process
//! gets its own std thread, and a single baton decides which of them may
//! run: a context switch hands the baton to the target and parks the
//! caller until the baton comes back. Exactly one process thread makes
//! progress at any time, as on the real single-core target.
//!
//! ## Halting
//!
//! There is no hardware to power off, so the simulation ends when a process
//! entry function returns, a process calls [`Hosted::halt`], or a process
//! panics. Every other process thread is then unwound with a private
//! payload and joined, and [`Port::launch`] returns to the boot code,
//! re-raising the panic if there was one.
//!
//! ## Interrupts
//!
//! Interrupts are simulated synchronously: a process calls
//! `Kernel::handle_tick` or `Kernel::interrupt` directly. Masking only
//! records a flag so tests can observe the guard.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::config::{HOSTED_IDLE_LIMIT, PID_NULL};
use crate::process::{Pid, ProcEntry};
use crate::sync::InterruptMask;

use super::Port;

/// Unwind payload used to stop process threads once the simulation halts.
struct Halt;

/// Who may run, and how the simulation ended.
#[derive(Default)]
struct Baton {
    running: Option<Pid>,
    halted: bool,
    failure: Option<Box<dyn Any + Send>>,
    threads: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct Shared {
    baton: Mutex<Baton>,
    turn: Condvar,
    masked: AtomicBool,
    idle_spins: AtomicU32,
}

/// The hosted port. Cloning yields a handle to the same simulation.
#[derive(Clone, Default)]
pub struct Hosted {
    shared: Arc<Shared>,
}

impl Hosted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the atomic guard currently has interrupts masked.
    pub fn interrupts_masked(&self) -> bool {
        self.shared.masked.load(Ordering::Relaxed)
    }

    /// Stop the simulation from inside a process.
    pub fn halt(&self) -> ! {
        self.finish(None);
        panic::resume_unwind(Box::new(Halt))
    }

    fn lock(&self) -> MutexGuard<'_, Baton> {
        self.shared.baton.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Give the baton to `pid`.
    fn hand_over(&self, pid: Pid) {
        if pid != PID_NULL {
            self.shared.idle_spins.store(0, Ordering::Relaxed);
        }
        self.lock().running = Some(pid);
        self.shared.turn.notify_all();
    }

    /// Park until `pid` holds the baton. Returns `false` if the simulation
    /// halted instead.
    fn wait_for_turn(&self, pid: Pid) -> bool {
        let baton = self
            .shared
            .turn
            .wait_while(self.lock(), |b| !b.halted && b.running != Some(pid))
            .unwrap_or_else(PoisonError::into_inner);
        !baton.halted
    }

    /// Mark the simulation halted, keeping the first failure reported.
    fn finish(&self, failure: Option<Box<dyn Any + Send>>) {
        let mut baton = self.lock();
        baton.halted = true;
        if baton.failure.is_none() {
            baton.failure = failure;
        }
        drop(baton);
        self.shared.turn.notify_all();
    }
}

impl InterruptMask for Hosted {
    fn mask_interrupts(&self) {
        self.shared.masked.store(true, Ordering::Relaxed);
    }

    fn unmask_interrupts(&self) {
        self.shared.masked.store(false, Ordering::Relaxed);
    }
}

impl Port for Hosted {
    /// A process is identified by its pid; the thread keeps the rest.
    type Context = ();

    const INITIAL_CONTEXT: () = ();

    fn initial_context<K: Sync + 'static>(&self, pid: Pid, entry: ProcEntry<K>, kernel: &'static K) {
        let port = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("pid-{}", pid))
            .spawn(move || {
                if !port.wait_for_turn(pid) {
                    return;
                }
                match panic::catch_unwind(AssertUnwindSafe(|| entry(kernel))) {
                    Ok(()) => {
                        log::info!("pid {} returned, halting", pid);
                        port.finish(None);
                    }
                    Err(payload) if payload.is::<Halt>() => {}
                    Err(payload) => port.finish(Some(payload)),
                }
            });

        match spawned {
            Ok(handle) => self.lock().threads.push(handle),
            Err(e) => {
                log::error!("cannot spawn thread for pid {}: {}", pid, e);
                self.finish(Some(Box::new(format!("spawn failed for pid {}", pid))));
            }
        }
    }

    unsafe fn switch_context(&self, from: (Pid, *mut ()), to: (Pid, *const ())) {
        self.hand_over(to.0);
        if !self.wait_for_turn(from.0) {
            panic::resume_unwind(Box::new(Halt));
        }
    }

    unsafe fn launch(&self, pid: Pid, _context: *const ()) {
        self.hand_over(pid);

        let threads = {
            let mut baton = self
                .shared
                .turn
                .wait_while(self.lock(), |b| !b.halted)
                .unwrap_or_else(PoisonError::into_inner);
            core::mem::take(&mut baton.threads)
        };
        for handle in threads {
            let _ = handle.join();
        }

        if let Some(payload) = self.lock().failure.take() {
            panic::resume_unwind(payload);
        }
    }

    fn idle(&self) {
        let spins = self.shared.idle_spins.fetch_add(1, Ordering::Relaxed) + 1;
        if spins > HOSTED_IDLE_LIMIT {
            panic!("only the idle process ran for {} passes", spins);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_flag_follows_guard() {
        let port = Hosted::new();
        let guard = crate::sync::AtomicGuard::new();
        assert!(!port.interrupts_masked());
        guard.section(&port, || {
            assert!(port.interrupts_masked());
            guard.section(&port, || assert!(port.interrupts_masked()));
            assert!(port.interrupts_masked());
        });
        assert!(!port.interrupts_masked());
    }

    #[test]
    fn test_idle_budget_reports_failure() {
        let port = Hosted::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            for _ in 0..=HOSTED_IDLE_LIMIT {
                port.idle();
            }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_hand_over_resets_idle_budget() {
        let port = Hosted::new();
        for _ in 0..10 {
            port.idle();
        }
        port.hand_over(3);
        assert_eq!(port.shared.idle_spins.load(Ordering::Relaxed), 0);
        port.hand_over(PID_NULL);
        port.idle();
        assert_eq!(port.shared.idle_spins.load(Ordering::Relaxed), 1);
    }
}
