// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-producer single-consumer command queue.
//!
//! Lock-free bounded queue with atomic head/tail indices. Carries lifecycle
//! commands between the conductor, sender and receiver agents; nothing on the
//! data path goes through it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounded SPSC queue (capacity rounded up to a power of two).
///
/// Protocol:
/// - Producer: `offer()` writes the slot, then advances tail with release.
/// - Consumer: `poll()`/`drain()` read with acquire, take the slot, advance
///   head with release.
///
/// SAFETY: exactly one thread offers and exactly one thread polls. The
/// acquire/release pairs on tail and head order the slot writes.
pub struct SpscQueue<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    mask: usize,
    tail: AtomicUsize,
    head: AtomicUsize,
}

unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    /// # Panics
    /// Panics if capacity is 0.
    pub fn with_capacity(requested: usize) -> Self {
        assert!(requested > 0, "capacity must be > 0");
        let capacity = requested.next_power_of_two();
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity - 1,
            tail: AtomicUsize::new(0),
            head: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    pub fn size(&self) -> usize {
        self.tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.load(Ordering::Acquire))
    }

    /// Non-blocking enqueue; returns the element back when the queue is full.
    pub fn offer(&self, element: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) > self.mask {
            return Err(element);
        }

        unsafe {
            *self.slots[tail & self.mask].get() = Some(element);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);

        Ok(())
    }

    /// Non-blocking dequeue.
    pub fn poll(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let element = unsafe { (*self.slots[head & self.mask].get()).take() };
        self.head.store(head.wrapping_add(1), Ordering::Release);

        element
    }

    /// Drain everything currently in the queue, returning the count.
    pub fn drain(&self, mut handler: impl FnMut(T)) -> usize {
        let mut count = 0;
        while let Some(element) = self.poll() {
            handler(element);
            count += 1;
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_offer_poll() {
        let q = SpscQueue::with_capacity(4);
        assert!(q.offer(1).is_ok());
        assert!(q.offer(2).is_ok());
        assert_eq!(q.size(), 2);
        assert_eq!(q.poll(), Some(1));
        assert_eq!(q.poll(), Some(2));
        assert_eq!(q.poll(), None);
    }

    #[test]
    fn test_full_returns_element() {
        let q = SpscQueue::with_capacity(2);
        assert!(q.offer(1).is_ok());
        assert!(q.offer(2).is_ok());
        assert_eq!(q.offer(3), Err(3));
    }

    #[test]
    fn test_drain() {
        let q = SpscQueue::with_capacity(8);
        for i in 0..5 {
            q.offer(i).unwrap();
        }

        let mut seen = Vec::new();
        let drained = q.drain(|v| seen.push(v));
        assert_eq!(drained, 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_wraps_around() {
        let q = SpscQueue::with_capacity(2);
        for i in 0..100 {
            q.offer(i).unwrap();
            assert_eq!(q.poll(), Some(i));
        }
    }

    #[test]
    fn test_cross_thread_transfer() {
        let q = Arc::new(SpscQueue::with_capacity(1024));
        let producer_q = q.clone();

        let producer = thread::spawn(move || {
            for i in 0..10_000u64 {
                while producer_q.offer(i).is_err() {
                    thread::yield_now();
                }
            }
        });

        let mut next = 0u64;
        while next < 10_000 {
            if let Some(v) = q.poll() {
                assert_eq!(v, next);
                next += 1;
            }
        }

        producer.join().unwrap();
    }
}
