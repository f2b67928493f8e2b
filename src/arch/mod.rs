//! # Architecture Abstraction Layer
//!
//! The kernel only needs two things from the platform: a way to mask
//! interrupts, and an opaque execution context it can create for a new
//! process and swap between processes. [`Port`] is that boundary.
//!
//! - [`cortex_m3`]: LPC17xx / Cortex-M3. Contexts are saved process stack
//!   pointers; PendSV performs the swap.
//! - [`hosted`]: host simulation. Every process is a std thread and only the
//!   thread holding the baton runs.

use crate::process::{Pid, ProcEntry};
use crate::sync::InterruptMask;

#[cfg(target_arch = "arm")]
pub mod cortex_m3;

#[cfg(feature = "std")]
pub mod hosted;

/// Platform services required by the kernel.
pub trait Port: InterruptMask + Sync + Sized + 'static {
    /// Saved execution context of one process.
    type Context: Copy + Send;

    /// Placeholder stored for processes that have not run yet.
    const INITIAL_CONTEXT: Self::Context;

    /// Synthesize the context of a process that has never run, as if it
    /// had been interrupted right at `entry(kernel)`.
    fn initial_context<K: Sync + 'static>(
        &self,
        pid: Pid,
        entry: ProcEntry<K>,
        kernel: &'static K,
    ) -> Self::Context;

    /// Save the live context of `from` and resume `to`. Returns when `from`
    /// is dispatched again.
    ///
    /// # Safety
    /// Both pointers must stay valid for as long as the processes exist,
    /// and the caller must not be inside an atomic section.
    unsafe fn switch_context(
        &self,
        from: (Pid, *mut Self::Context),
        to: (Pid, *const Self::Context),
    );

    /// Transfer control to the first process.
    ///
    /// # Safety
    /// Must be called once, from the boot context, outside any atomic
    /// section. Bare-metal ports never return from this call.
    unsafe fn launch(&self, pid: Pid, context: *const Self::Context);

    /// Called by the idle process on every pass of its loop.
    fn idle(&self) {}
}
