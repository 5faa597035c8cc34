//! src/dataloader/workers/pool.rs
//!
//! Worker pool for parallel batch production.
//!
//! Manages worker lifecycle and communication through bounded
//! channels: one task channel per worker (round-robin dispatch keeps
//! ticket routing deterministic) and one shared completion sender
//! captured by the worker function. Workers exit when their task
//! channel disconnects; the pool joins them on drop, so threads never
//! outlive a discarded loader even when iteration is abandoned early.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::debug;
use std::sync::Arc;
use std::thread;

/// Bounded pool of worker threads fed through per-worker channels.
pub(crate) struct WorkerPool<Task> {
    workers: Vec<thread::JoinHandle<()>>,
    task_txs: Vec<Sender<Task>>,
    next_worker: usize,
}

impl<Task: Send + 'static> WorkerPool<Task> {
    /// Spawns `num_workers` threads running `worker_fn(worker_id, rx)`.
    ///
    /// Each task channel is bounded by `buffer_size`, so dispatch
    /// exerts backpressure instead of queueing without limit.
    pub(crate) fn new<F>(num_workers: usize, buffer_size: usize, worker_fn: F) -> Result<Self>
    where
        F: Fn(usize, Receiver<Task>) + Send + Sync + 'static,
    {
        if num_workers == 0 {
            return Err(anyhow!(
                "cannot create a worker pool with 0 workers; use single-threaded mode"
            ));
        }
        if buffer_size == 0 {
            return Err(anyhow!(
                "cannot create a worker pool with buffer_size 0; a zero-capacity \
                channel would deadlock dispatch"
            ));
        }

        let worker_fn = Arc::new(worker_fn);
        let mut task_txs = Vec::with_capacity(num_workers);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = bounded(buffer_size);
            let worker_fn = worker_fn.clone();

            let handle = thread::Builder::new()
                .name(format!("pipeline-worker-{}", worker_id))
                .spawn(move || worker_fn(worker_id, rx))
                .with_context(|| format!("failed to spawn worker thread {}", worker_id))?;

            task_txs.push(tx);
            workers.push(handle);
        }

        Ok(Self {
            workers,
            task_txs,
            next_worker: 0,
        })
    }

    /// Sends one task to the next worker in round-robin order,
    /// blocking while that worker's channel is full.
    pub(crate) fn dispatch(&mut self, task: Task) -> Result<()> {
        let worker_id = self.next_worker;
        self.next_worker = (self.next_worker + 1) % self.task_txs.len();
        self.task_txs[worker_id]
            .send(task)
            .map_err(|_| anyhow!("worker {} channel closed; worker may have crashed", worker_id))
    }
}

impl<Task> Drop for WorkerPool<Task> {
    fn drop(&mut self) {
        // Closing the task channels is the shutdown signal.
        self.task_txs.clear();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!("worker pool shut down");
    }
}
