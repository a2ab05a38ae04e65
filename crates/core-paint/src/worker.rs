//! Fixed-size worker pool over a bounded job channel.
//!
//! Workers run one shared job function; each thread knows its index so
//! callers can hand out per-thread scratch. Shutdown is cooperative: when
//! the sender side is dropped the channel drains and every worker exits its
//! receive loop.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

pub struct WorkerPool<J: Send + 'static> {
    tx: Mutex<Option<Sender<J>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    thread_count: usize,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawn `thread_count` workers behind a queue of `capacity` jobs.
    pub fn new<F>(name: &'static str, capacity: usize, thread_count: usize, job_fn: F) -> Self
    where
        F: Fn(J, usize) + Send + Sync + 'static,
    {
        let thread_count = thread_count.max(1);
        let (tx, rx) = bounded::<J>(capacity);
        let job_fn = Arc::new(job_fn);
        let mut handles = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let rx: Receiver<J> = rx.clone();
            let job_fn = Arc::clone(&job_fn);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    debug!(target: "render.pool", worker = index, "worker_started");
                    for job in rx {
                        job_fn(job, index);
                    }
                    debug!(target: "render.pool", worker = index, "worker_stopped");
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        Self { tx: Mutex::new(Some(tx)), handles: Mutex::new(handles), thread_count }
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Enqueue a job, blocking while the queue is at capacity. Jobs pushed
    /// after `free_join` are dropped.
    pub fn push(&self, job: J) {
        let tx = self.tx.lock().expect("worker pool mutex poisoned");
        match tx.as_ref() {
            Some(sender) => {
                if sender.send(job).is_err() {
                    warn!(target: "render.pool", "push after worker shutdown");
                }
            }
            None => warn!(target: "render.pool", "push after worker shutdown"),
        }
    }

    /// Close the queue and join every worker. Idempotent.
    pub fn free_join(&self) {
        drop(self.tx.lock().expect("worker pool mutex poisoned").take());
        let handles = std::mem::take(&mut *self.handles.lock().expect("worker pool mutex poisoned"));
        for handle in handles {
            if handle.join().is_err() {
                warn!(target: "render.pool", "worker panicked");
            }
        }
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.free_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn all_jobs_run_and_join_completes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let pool = WorkerPool::new("test", 16, 4, move |n: usize, _t| {
            c.fetch_add(n, Ordering::SeqCst);
        });
        assert_eq!(pool.thread_count(), 4);
        for _ in 0..100 {
            pool.push(1);
        }
        pool.free_join();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn push_after_join_is_ignored() {
        let pool = WorkerPool::new("test", 4, 1, |_: usize, _| {});
        pool.free_join();
        pool.push(7);
        pool.free_join();
    }

    #[test]
    fn thread_indexes_stay_in_range() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let pool = WorkerPool::new("test", 8, 3, move |_: (), t| {
            assert!(t < 3);
            s.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..30 {
            pool.push(());
        }
        pool.free_join();
        assert_eq!(seen.load(Ordering::SeqCst), 30);
    }
}
