//! # Fixed Block Allocator
//!
//! Two independent pools of fixed-size slots: general-purpose memory blocks
//! and message envelopes. Each pool is an array of slots plus a parallel
//! ownership table; a slot is free when it has no owner.
//!
//! Addresses handed out are the real addresses of the slots, so a released
//! address maps back to its slot with `(address - base) / block_size`.
//! Out-of-range and misaligned addresses are rejected.
//!
//! This module only does the bookkeeping. Blocking callers on exhaustion
//! and waking them on release is the scheduler's job.

use core::mem::size_of;

use crate::config::MEM_BLOCK_SIZE;
use crate::error::KernelError;
use crate::process::Pid;

/// Selects one of the two pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// General-purpose memory blocks.
    General,
    /// Message envelopes.
    Envelope,
}

/// Address of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockAddr(usize);

impl BlockAddr {
    /// Wrap a raw address, e.g. one received from outside the kernel.
    #[inline]
    pub const fn from_raw(addr: usize) -> Self {
        BlockAddr(addr)
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Address `bytes` further on. Used to probe misaligned releases.
    #[inline]
    pub const fn offset(self, bytes: usize) -> Self {
        BlockAddr(self.0 + bytes)
    }
}

/// One general-purpose memory block.
#[derive(Clone, Copy)]
#[repr(C, align(8))]
pub struct MemBlock(pub [u8; MEM_BLOCK_SIZE]);

impl MemBlock {
    pub const ZERO: MemBlock = MemBlock([0; MEM_BLOCK_SIZE]);
}

// ---------------------------------------------------------------------------
// Block pool
// ---------------------------------------------------------------------------

/// A pool of `N` slots of type `T`.
pub struct BlockPool<T, const N: usize> {
    slots: [T; N],
    owners: [Option<Pid>; N],
}

impl<T, const N: usize> BlockPool<T, N> {
    /// Size of one slot, the stride between consecutive addresses.
    pub const BLOCK_SIZE: usize = size_of::<T>();

    pub const fn new(slots: [T; N]) -> Self {
        Self {
            slots,
            owners: [None; N],
        }
    }

    #[inline]
    fn base(&self) -> usize {
        self.slots.as_ptr() as usize
    }

    /// Address of slot `index`.
    #[inline]
    pub fn addr_of(&self, index: usize) -> BlockAddr {
        BlockAddr(self.base() + index * Self::BLOCK_SIZE)
    }

    /// Claim the first free slot for `owner`.
    pub fn try_allocate(&mut self, owner: Pid) -> Option<usize> {
        let index = self.owners.iter().position(Option::is_none)?;
        self.owners[index] = Some(owner);
        Some(index)
    }

    /// Map an address back to its slot index.
    pub fn index_of(&self, addr: BlockAddr) -> Result<usize, KernelError> {
        let offset = addr
            .0
            .checked_sub(self.base())
            .ok_or(KernelError::InvalidAddress)?;
        if offset % Self::BLOCK_SIZE != 0 {
            return Err(KernelError::InvalidAddress);
        }
        let index = offset / Self::BLOCK_SIZE;
        if index >= N {
            return Err(KernelError::InvalidAddress);
        }
        Ok(index)
    }

    /// Return the slot at `addr` to the pool.
    pub fn free(&mut self, addr: BlockAddr) -> Result<usize, KernelError> {
        let index = self.index_of(addr)?;
        self.free_index(index)?;
        Ok(index)
    }

    /// Return slot `index` to the pool.
    pub fn free_index(&mut self, index: usize) -> Result<(), KernelError> {
        match self.owners.get_mut(index) {
            None => Err(KernelError::InvalidAddress),
            Some(None) => Err(KernelError::DoubleRelease),
            Some(owner) => {
                *owner = None;
                Ok(())
            }
        }
    }

    /// Current owner of slot `index`.
    #[inline]
    pub fn owner(&self, index: usize) -> Option<Pid> {
        self.owners.get(index).copied().flatten()
    }

    #[inline]
    pub fn is_allocated(&self, index: usize) -> bool {
        self.owner(index).is_some()
    }

    pub fn free_count(&self) -> usize {
        self.owners.iter().filter(|o| o.is_none()).count()
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    pub fn get(&self, index: usize) -> &T {
        &self.slots[index]
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        &mut self.slots[index]
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
