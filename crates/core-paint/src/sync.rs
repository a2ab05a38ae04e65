//! Counting semaphore on `Mutex` + `Condvar`.
//!
//! The queue protocol and the render barrier are specified in semaphore
//! terms (value / wait / post, with batched variants), so the primitive is
//! spelled out here rather than approximated with channels.
//!
//! Invariants:
//! * `value()` equals posts minus completed waits.
//! * `wait_n(n)` takes exactly `n` permits, possibly across several
//!   wake-ups; it never takes more than is available at any instant.

use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(value: usize) -> Self {
        Self { count: Mutex::new(value), cond: Condvar::new() }
    }

    /// Current permit count. Only a snapshot; mainly useful in assertions.
    pub fn value(&self) -> usize {
        *self.count.lock().expect("semaphore mutex poisoned")
    }

    /// Take one permit, blocking until one is available.
    pub fn wait(&self) {
        self.wait_n(1);
    }

    /// Take `n` permits, blocking as needed.
    pub fn wait_n(&self, n: usize) {
        let mut remaining = n;
        while remaining > 0 {
            let mut count = self.count.lock().expect("semaphore mutex poisoned");
            while *count == 0 {
                count = self.cond.wait(count).expect("semaphore mutex poisoned");
            }
            let take = remaining.min(*count);
            *count -= take;
            remaining -= take;
        }
    }

    /// Release one permit.
    pub fn post(&self) {
        self.post_n(1);
    }

    /// Release `n` permits with a single wake-up round.
    pub fn post_n(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut count = self.count.lock().expect("semaphore mutex poisoned");
        *count += n;
        drop(count);
        self.cond.notify_all();
    }
}
