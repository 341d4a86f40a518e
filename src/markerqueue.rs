// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Multi-producer single-consumer queue of non-zero values over a fixed
// slot array. Zero marks an empty slot, so it can not be stored; servers
// use this to fan per-client request queues into one awakening point,
// pushing client ids or packed pointers.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

pub struct MarkerQueue {
    ring: Box<[AtomicUsize]>,
    /// Consumer position, only the single reader touches it.
    head: AtomicUsize,
    /// Producer position.
    tail: AtomicUsize,
}

impl MarkerQueue {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut ring = Vec::with_capacity(size);
        ring.resize_with(size, || AtomicUsize::new(0));
        Self { ring: ring.into_boxed_slice(), head: AtomicUsize::new(0), tail: AtomicUsize::new(0) }
    }

    fn next(&self, i: usize) -> usize {
        if i + 1 == self.ring.len() {
            0
        } else {
            i + 1
        }
    }

    /// Store a value; `value` must not be zero. `Again` when full.
    pub fn push(&self, value: usize) -> Result<()> {
        assert!(value != 0, "zero is the empty-slot marker");
        loop {
            let t = self.tail.load(Ordering::Acquire);
            let next = self.next(t);
            if next == self.head.load(Ordering::Acquire) {
                // Race: another producer may have already shifted tail
                // between our load and the full check; recheck before
                // reporting full.
                if self.tail.load(Ordering::Acquire) != t {
                    continue;
                }
                return Err(Error::Again);
            }
            if self.ring[t]
                .compare_exchange_weak(0, value, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                if self.tail.load(Ordering::Acquire) != t {
                    // Race: the slot we claimed was already consumed and
                    // tail moved past it; give the slot back and retry.
                    self.ring[t].store(0, Ordering::Release);
                    continue;
                }
                self.tail.store(next, Ordering::Release);
                return Ok(());
            }
        }
    }

    pub fn empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }

    /// Take the oldest value, `None` when empty. Single consumer only.
    pub fn pop(&self) -> Option<usize> {
        let h = self.head.load(Ordering::Relaxed);
        if self.tail.load(Ordering::Acquire) == h {
            return None;
        }
        let r = self.ring[h].swap(0, Ordering::AcqRel);
        self.head.store(self.next(h), Ordering::Release);
        if r == 0 {
            None
        } else {
            Some(r)
        }
    }

    pub fn clear(&mut self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        for slot in self.ring.iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_order() {
        let q = MarkerQueue::new(4);
        assert!(q.empty());
        assert_eq!(q.pop(), None);

        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        // One slot is the full/empty separator.
        assert!(q.push(4).unwrap_err().is_again());

        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        q.push(4).unwrap();
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(4));
        assert!(q.empty());
    }
}
