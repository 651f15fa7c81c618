//! Fixed-size worker pools.
//!
//! The tablet manager runs long bootstrap jobs on a dedicated pool so
//! callers never block on tablet opens, and funnels apply work through
//! two single-thread executors. All three are instances of
//! [`WorkerPool`]: a fixed set of named OS threads draining a shared
//! queue, with `wait` (quiesce) and `shutdown` (drain then join)
//! primitives.

use crate::core::error::{SlateError, SlateResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PoolQueue {
    jobs: VecDeque<Job>,
    active: usize,
    shutting_down: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    /// Signaled when a job is enqueued or shutdown begins.
    job_ready: Condvar,
    /// Signaled when the pool goes idle (queue empty, no active jobs).
    idle: Condvar,
}

/// A fixed-size pool of named worker threads.
pub struct WorkerPool {
    name: String,
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn a pool of `num_threads` workers named `<name>-<index>`.
    pub fn new(name: impl Into<String>, num_threads: usize) -> Self {
        assert!(num_threads > 0, "worker pool requires at least one thread");
        let name = name.into();
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue::default()),
            job_ready: Condvar::new(),
            idle: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || worker_loop(&shared))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        Self {
            name,
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a job. Fails once shutdown has begun.
    pub fn submit<F>(&self, job: F) -> SlateResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        if queue.shutting_down {
            return Err(SlateError::illegal_state(format!(
                "worker pool {} is shut down",
                self.name
            )));
        }
        queue.jobs.push_back(Box::new(job));
        self.shared.job_ready.notify_one();
        Ok(())
    }

    /// Block until the queue is empty and no job is running.
    pub fn wait(&self) {
        let mut queue = self.shared.queue.lock();
        while !queue.jobs.is_empty() || queue.active > 0 {
            self.shared.idle.wait(&mut queue);
        }
    }

    /// Drain outstanding jobs and join the workers. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.shutting_down = true;
            self.shared.job_ready.notify_all();
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            // A worker that panicked already tore its job down; joining
            // the rest is still required for drain semantics.
            let _ = handle.join();
        }
    }

    /// Number of jobs queued but not yet started.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    queue.active += 1;
                    break job;
                }
                if queue.shutting_down {
                    return;
                }
                shared.job_ready.wait(&mut queue);
            }
        };

        job();

        let mut queue = shared.queue.lock();
        queue.active -= 1;
        if queue.jobs.is_empty() && queue.active == 0 {
            shared.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_jobs_run_and_wait_quiesces() {
        let pool = WorkerPool::new("test-pool", 4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_shutdown_drains_outstanding_jobs() {
        let pool = WorkerPool::new("drain-pool", 2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(2));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new("closed-pool", 1);
        pool.shutdown();
        let result = pool.submit(|| {});
        assert!(matches!(result, Err(SlateError::IllegalState { .. })));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = WorkerPool::new("idem-pool", 2);
        pool.submit(|| {}).unwrap();
        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn test_wait_on_idle_pool_returns_immediately() {
        let pool = WorkerPool::new("idle-pool", 2);
        pool.wait();
    }
}
