//! # Envelopes and Mailboxes
//!
//! Every in-flight message travels in an envelope drawn from the envelope
//! pool. Envelopes are linked into lists (a process mailbox, or the timer's
//! pending list) through the index of the next envelope rather than a
//! pointer, so a list can only ever name slots of the pool it lives in.
//!
//! An envelope is in at most one list at a time. It moves from the sender
//! into exactly one mailbox, possibly through the pending list of delayed
//! messages, and finally to the receiver, who returns it to the pool.

use crate::memory::{BlockAddr, BlockPool};
use crate::process::Pid;

/// Control structure carrying one message.
#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    /// The message body, a general-purpose memory block.
    pub payload: BlockAddr,
    /// Next envelope in the list this one is linked into.
    pub next: Option<usize>,
    /// Final destination.
    pub dest: Pid,
    pub sender: Pid,
    /// Requested delay in ticks. Zero for immediate sends.
    pub delay: u32,
    /// Absolute delivery tick, set when the timer takes the envelope.
    pub deadline: u64,
}

impl Envelope {
    pub const EMPTY: Envelope = Envelope {
        payload: BlockAddr::from_raw(0),
        next: None,
        dest: 0,
        sender: 0,
        delay: 0,
        deadline: 0,
    };
}

/// A message as seen by its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub sender: Pid,
    pub payload: BlockAddr,
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

/// Singly linked FIFO of envelope indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mailbox {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Append envelope `index` at the tail.
    pub fn push<const N: usize>(&mut self, envelopes: &mut BlockPool<Envelope, N>, index: usize) {
        envelopes.get_mut(index).next = None;
        match self.tail {
            Some(tail) => envelopes.get_mut(tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
    }

    /// Unlink and return the oldest envelope.
    pub fn pop<const N: usize>(&mut self, envelopes: &mut BlockPool<Envelope, N>) -> Option<usize> {
        let head = self.head?;
        let env = envelopes.get_mut(head);
        self.head = env.next.take();
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(head)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn envelopes() -> BlockPool<Envelope, 4> {
        BlockPool::new([Envelope::EMPTY; 4])
    }

    #[test]
    fn test_fifo_order() {
        let mut pool = envelopes();
        let mut mbox = Mailbox::new();
        let a = pool.try_allocate(1).unwrap();
        let b = pool.try_allocate(1).unwrap();
        let c = pool.try_allocate(1).unwrap();

        mbox.push(&mut pool, a);
        mbox.push(&mut pool, b);
        mbox.push(&mut pool, c);
        assert_eq!(mbox.len(), 3);

        assert_eq!(mbox.pop(&mut pool), Some(a));
        assert_eq!(mbox.pop(&mut pool), Some(b));

        // Refill after partial drain
        mbox.push(&mut pool, a);
        assert_eq!(mbox.pop(&mut pool), Some(c));
        assert_eq!(mbox.pop(&mut pool), Some(a));
        assert_eq!(mbox.pop(&mut pool), None);
        assert!(mbox.is_empty());
        assert_eq!(mbox.len(), 0);
    }

    #[test]
    fn test_pop_unlinks_envelope() {
        let mut pool = envelopes();
        let mut mbox = Mailbox::new();
        let a = pool.try_allocate(1).unwrap();
        let b = pool.try_allocate(1).unwrap();
        mbox.push(&mut pool, a);
        mbox.push(&mut pool, b);

        assert_eq!(mbox.pop(&mut pool), Some(a));
        assert_eq!(pool.get(a).next, None);
    }
}
