//! # Synchronization Primitives
//!
//! The atomic section guard protecting all shared kernel state (pool flags,
//! ready/blocked queues, mailboxes, the delayed-delivery list) from
//! interrupt-level reentrancy.
//!
//! Sections nest: interrupts are masked when the nesting depth goes from 0
//! to 1 and unmasked when it drops back to 0. A section must never stay
//! open across a call that can reschedule; such calls leave the section
//! first and re-enter it after resuming.

use core::sync::atomic::{AtomicU32, Ordering};

/// Hardware hook used by the guard to mask and unmask interrupts.
pub trait InterruptMask {
    /// Disable interrupt delivery.
    fn mask_interrupts(&self);
    /// Re-enable interrupt delivery.
    fn unmask_interrupts(&self);
}

/// Nested interrupt-mask counter.
///
/// The counter is an atomic only so the guard can live in a shared
/// `static`; the kernel runs on a single core and never races on it.
pub struct AtomicGuard {
    depth: AtomicU32,
}

impl AtomicGuard {
    pub const fn new() -> Self {
        Self {
            depth: AtomicU32::new(0),
        }
    }

    /// Enter a guarded section, masking interrupts on the outermost entry.
    #[inline]
    pub fn enter<M: InterruptMask + ?Sized>(&self, mask: &M) {
        if self.depth.fetch_add(1, Ordering::Acquire) == 0 {
            mask.mask_interrupts();
        }
    }

    /// Leave a guarded section, unmasking interrupts when the outermost
    /// section closes. Unbalanced exits are clamped at zero.
    #[inline]
    pub fn exit<M: InterruptMask + ?Sized>(&self, mask: &M) {
        let prev = self
            .depth
            .fetch_update(Ordering::Release, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        if prev == 1 {
            mask.unmask_interrupts();
        }
    }

    /// Current nesting depth. Zero means interrupts are enabled.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }

    /// Run `f` inside a guarded section.
    #[inline]
    pub fn section<M, F, R>(&self, mask: &M, f: F) -> R
    where
        M: InterruptMask + ?Sized,
        F: FnOnce() -> R,
    {
        self.enter(mask);
        let ret = f();
        self.exit(mask);
        ret
    }
}

impl Default for AtomicGuard {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
