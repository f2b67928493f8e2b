//! # Delayed Delivery
//!
//! The timer i-process keeps delayed envelopes in a pending list sorted by
//! absolute deadline tick, linked through the envelopes' `next` index. The
//! list is owned exclusively by the timer logic: envelopes enter it from
//! the timer's own mailbox and leave it only to be dispatched to their real
//! destination.
//!
//! ## Ordering
//!
//! Insertion is stable: an envelope is placed after every pending envelope
//! with a deadline less than or equal to its own, so messages due on the
//! same tick are delivered in the order the timer received them.

use crate::memory::BlockPool;
use crate::message::Envelope;

/// Monotonic tick counter plus the sorted pending list.
pub struct DelayQueue {
    /// Ticks since boot.
    ticks: u64,
    head: Option<usize>,
    len: usize,
}

impl DelayQueue {
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            head: None,
            len: 0,
        }
    }

    /// Current tick count.
    #[inline]
    pub fn now(&self) -> u64 {
        self.ticks
    }

    /// Advance time by one tick.
    #[inline]
    pub fn advance(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Deadline of the next envelope due.
    pub fn next_deadline<const N: usize>(&self, envelopes: &BlockPool<Envelope, N>) -> Option<u64> {
        self.head.map(|h| envelopes.get(h).deadline)
    }

    /// Stamp envelope `index` with its absolute deadline (now + delay) and
    /// link it into the pending list.
    pub fn insert<const N: usize>(&mut self, envelopes: &mut BlockPool<Envelope, N>, index: usize) {
        let deadline = self.ticks.wrapping_add(u64::from(envelopes.get(index).delay));
        envelopes.get_mut(index).deadline = deadline;

        match self.head {
            Some(head) if envelopes.get(head).deadline <= deadline => {
                // Walk past every envelope due no later than this one
                let mut it = head;
                while let Some(next) = envelopes.get(it).next {
                    if envelopes.get(next).deadline > deadline {
                        break;
                    }
                    it = next;
                }
                envelopes.get_mut(index).next = envelopes.get(it).next;
                envelopes.get_mut(it).next = Some(index);
            }
            _ => {
                // Empty list, or earlier than the current minimum
                envelopes.get_mut(index).next = self.head;
                self.head = Some(index);
            }
        }
        self.len += 1;
        log::debug!("delayed envelope {} due at tick {}", index, deadline);
    }

    /// Unlink the head envelope if its deadline has been reached.
    pub fn pop_expired<const N: usize>(&mut self, envelopes: &mut BlockPool<Envelope, N>) -> Option<usize> {
        let head = self.head?;
        if envelopes.get(head).deadline > self.ticks {
            return None;
        }
        self.head = envelopes.get_mut(head).next.take();
        self.len -= 1;
        Some(head)
    }
}

impl Default for DelayQueue {
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
    use quickcheck_macros::quickcheck;
    use std::vec::Vec;

    const N: usize = 16;

    fn envelope_with_delay(pool: &mut BlockPool<Envelope, N>, delay: u32) -> usize {
        let i = pool.try_allocate(1).unwrap();
        *pool.get_mut(i) = Envelope {
            delay,
            ..Envelope::EMPTY
        };
        i
    }

    fn drain_at(q: &mut DelayQueue, pool: &mut BlockPool<Envelope, N>) -> Vec<usize> {
        core::iter::from_fn(|| q.pop_expired(pool)).collect()
    }

    #[test]
    fn test_nothing_due_before_deadline() {
        let mut pool = BlockPool::new([Envelope::EMPTY; N]);
        let mut q = DelayQueue::new();
        let e = envelope_with_delay(&mut pool, 3);
        q.insert(&mut pool, e);

        for _ in 0..2 {
            q.advance();
            assert_eq!(q.pop_expired(&mut pool), None);
        }
        q.advance();
        assert_eq!(q.pop_expired(&mut pool), Some(e));
        assert!(q.is_empty());
    }

    #[test]
    fn test_deadline_order_regardless_of_insertion() {
        let mut pool = BlockPool::new([Envelope::EMPTY; N]);
        let mut q = DelayQueue::new();
        let late = envelope_with_delay(&mut pool, 10);
        let early = envelope_with_delay(&mut pool, 2);
        let mid = envelope_with_delay(&mut pool, 5);
        q.insert(&mut pool, late);
        q.insert(&mut pool, early);
        q.insert(&mut pool, mid);
        assert_eq!(q.next_deadline(&pool), Some(2));

        for _ in 0..10 {
            q.advance();
        }
        assert_eq!(drain_at(&mut q, &mut pool), [early, mid, late]);
    }

    #[test]
    fn test_equal_deadlines_keep_arrival_order() {
        let mut pool = BlockPool::new([Envelope::EMPTY; N]);
        let mut q = DelayQueue::new();
        let a = envelope_with_delay(&mut pool, 4);
        let b = envelope_with_delay(&mut pool, 4);
        let c = envelope_with_delay(&mut pool, 4);
        q.insert(&mut pool, a);
        q.insert(&mut pool, b);
        q.insert(&mut pool, c);

        for _ in 0..4 {
            q.advance();
        }
        assert_eq!(drain_at(&mut q, &mut pool), [a, b, c]);
    }

    #[test]
    fn test_deadline_is_relative_to_insertion_tick() {
        let mut pool = BlockPool::new([Envelope::EMPTY; N]);
        let mut q = DelayQueue::new();
        for _ in 0..7 {
            q.advance();
        }
        let e = envelope_with_delay(&mut pool, 5);
        q.insert(&mut pool, e);
        assert_eq!(pool.get(e).deadline, 12);
    }

    #[test]
    fn test_longest_delay_is_not_truncated() {
        let mut pool = BlockPool::new([Envelope::EMPTY; N]);
        let mut q = DelayQueue::new();
        q.advance();
        let e = envelope_with_delay(&mut pool, u32::MAX);
        q.insert(&mut pool, e);
        assert_eq!(pool.get(e).deadline, u64::from(u32::MAX) + 1);
        assert_eq!(q.pop_expired(&mut pool), None);
    }

    /// Delivery order is ascending by deadline, ties in insertion order,
    /// and nothing is delivered before its deadline.
    #[quickcheck]
    fn prop_delivery_order(delays: Vec<u8>) -> bool {
        let mut pool = BlockPool::new([Envelope::EMPTY; N]);
        let mut q = DelayQueue::new();
        let mut expected: Vec<(u64, usize)> = Vec::new();
        for &d in delays.iter().take(N) {
            let e = envelope_with_delay(&mut pool, u32::from(d % 32));
            q.insert(&mut pool, e);
            expected.push((u64::from(d % 32), e));
        }
        expected.sort_by_key(|&(deadline, _)| deadline);

        let mut delivered = Vec::new();
        for _ in 0..=32 {
            while let Some(e) = q.pop_expired(&mut pool) {
                if pool.get(e).deadline > q.now() {
                    return false;
                }
                delivered.push(e);
            }
            q.advance();
        }
        delivered == expected.iter().map(|&(_, e)| e).collect::<Vec<_>>()
    }
}
