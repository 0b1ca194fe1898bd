//! Bounded lock-free single-producer / single-consumer ring
//!
//! The single-producer/single-consumer discipline is enforced by
//! construction: [`channel`] hands out exactly one `Producer` and one
//! `Consumer`, neither of which is cloneable. Capacity must be a power of
//! two; one slot is kept free to distinguish full from empty, so a ring of
//! capacity `n` holds at most `n - 1` items.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Inner<T> {
    buffer: Box<[UnsafeCell<Option<T>>]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Slots are only touched by the side that owns the corresponding index.
unsafe impl<T: Send> Sync for Inner<T> {}
unsafe impl<T: Send> Send for Inner<T> {}

/// Producer half of an SPSC ring.
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
}

/// Consumer half of an SPSC ring.
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
}

/// Create an SPSC ring with the given power-of-two capacity.
///
/// # Panics
/// Panics if `capacity` is zero or not a power of two.
pub fn channel<T: Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(
        capacity > 0 && capacity.is_power_of_two(),
        "spsc capacity must be a power of two"
    );
    let buffer = (0..capacity)
        .map(|_| UnsafeCell::new(None))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let inner = Arc::new(Inner {
        buffer,
        mask: capacity - 1,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    (
        Producer {
            inner: Arc::clone(&inner),
        },
        Consumer { inner },
    )
}

impl<T> Producer<T> {
    /// Push a value; returns it back if the ring is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let inner = &*self.inner;
        let head = inner.head.load(Ordering::Relaxed);
        let next_head = (head + 1) & inner.mask;
        let tail = inner.tail.load(Ordering::Acquire);
        if next_head == tail {
            return Err(value);
        }
        unsafe {
            *inner.buffer[head].get() = Some(value);
        }
        inner.head.store(next_head, Ordering::Release);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tail.load(Ordering::Acquire) == self.inner.head.load(Ordering::Acquire)
    }
}

impl<T> Consumer<T> {
    /// Pop the oldest value, if any.
    pub fn pop(&mut self) -> Option<T> {
        let inner = &*self.inner;
        let tail = inner.tail.load(Ordering::Relaxed);
        let head = inner.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let value = unsafe { (*inner.buffer[tail].get()).take() };
        inner.tail.store((tail + 1) & inner.mask, Ordering::Release);
        value
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tail.load(Ordering::Acquire) == self.inner.head.load(Ordering::Acquire)
    }
}
