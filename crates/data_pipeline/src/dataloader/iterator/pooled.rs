//! src/dataloader/iterator/pooled.rs
//!
//! The pooled iterator: the concurrency core of the loader.
//!
//! On every `next()` the dispatcher tops up in-flight work until
//! `queue_depth + 1` tickets are outstanding (one extra ticket kept
//! ahead of consumption), then blocks until the next expected
//! sequence id appears in the reorder buffer. A background collector
//! thread is the sole mutator of that buffer: it drains the bounded
//! completion channel and inserts `(seq, result)` pairs under the
//! buffer lock, held only for the insert/remove critical section.
//!
//! Ordering guarantee: batches are returned in strictly increasing
//! sequence-id order regardless of completion order; later-arriving
//! in-order results wait in the buffer until earlier ones are
//! consumed.

use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::dataloader::workers::pool::WorkerPool;
use crate::dataloader::workers::{spawn_workers, Completion, ContextFactory, Ticket};
use crate::extract::FeedBatch;
use crate::sampler::BatchSampler;

/// Completed results keyed by sequence id, plus the condvar waking
/// the consumer when new results land. Bounded by the in-flight
/// ticket count; entries leave strictly in increasing seq order.
struct ReorderBuffer {
    results: Mutex<HashMap<u64, Result<FeedBatch>>>,
    ready: Condvar,
}

impl ReorderBuffer {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Result<FeedBatch>>> {
        // A worker panicking while the collector holds the lock is
        // already a fatal pipeline fault; keep the data visible.
        match self.results.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub(crate) struct PooledIter {
    // Drop order matters: the pool must go down (closing task
    // channels and joining workers) before the collector is joined.
    pool: Option<WorkerPool<Ticket>>,
    collector: Option<JoinHandle<()>>,
    buffer: Arc<ReorderBuffer>,
    sampler: Arc<Mutex<dyn BatchSampler>>,
    queue_depth: u64,
    needs_seed: bool,
    rank: u64,
    sent: u64,
    received: u64,
    failed: bool,
}

impl PooledIter {
    pub(crate) fn new(
        sampler: Arc<Mutex<dyn BatchSampler>>,
        factory: ContextFactory,
        needs_seed: bool,
        rank: u64,
        num_workers: usize,
        queue_depth: usize,
        max_tasks_per_worker: Option<usize>,
    ) -> Result<Self> {
        let (completion_tx, completion_rx) = bounded::<Completion>(queue_depth.max(1));

        let buffer = Arc::new(ReorderBuffer {
            results: Mutex::new(HashMap::new()),
            ready: Condvar::new(),
        });

        let pool = spawn_workers(
            num_workers,
            queue_depth,
            factory,
            completion_tx,
            max_tasks_per_worker,
        )?;

        // The collector is the only writer of the reorder buffer. It
        // exits when every worker has dropped its completion sender.
        let collector_buffer = buffer.clone();
        let collector = thread::Builder::new()
            .name("pipeline-collector".into())
            .spawn(move || {
                while let Ok((seq, result)) = completion_rx.recv() {
                    let mut results = collector_buffer.lock();
                    results.insert(seq, result);
                    drop(results);
                    collector_buffer.ready.notify_all();
                }
                debug!("collector drained; completion channel closed");
            })
            .map_err(|e| anyhow!("failed to spawn collector thread: {}", e))?;

        Ok(Self {
            pool: Some(pool),
            collector: Some(collector),
            buffer,
            sampler,
            queue_depth: queue_depth as u64,
            needs_seed,
            rank,
            sent: 0,
            received: 0,
            failed: false,
        })
    }

    /// Seed deterministic per (global sequence position, rank), never
    /// per wall-clock time, so multi-rank training stays reproducible.
    fn batch_seed(&self) -> Option<u64> {
        if self.needs_seed {
            Some((self.sent + 1) * (self.rank + 1))
        } else {
            None
        }
    }

    /// Dispatches new tickets until `queue_depth + 1` are in flight
    /// or the sampler runs out of index groups.
    fn top_up(&mut self) -> Result<()> {
        while self.sent - self.received <= self.queue_depth {
            let group = {
                let mut sampler = self
                    .sampler
                    .lock()
                    .map_err(|_| anyhow!("sampler lock poisoned"))?;
                sampler.next_group()
            };
            let Some(indices) = group else {
                break;
            };

            let ticket = Ticket {
                seq: self.sent,
                indices,
                batch_seed: self.batch_seed(),
            };
            self.pool
                .as_mut()
                .ok_or_else(|| anyhow!("worker pool already shut down"))?
                .dispatch(ticket)?;
            self.sent += 1;
        }
        Ok(())
    }

    pub(crate) fn next_batch(&mut self) -> Option<Result<FeedBatch>> {
        if self.failed {
            return None;
        }

        if let Err(e) = self.top_up() {
            self.failed = true;
            return Some(Err(e));
        }

        if self.received == self.sent {
            // Nothing in flight and nothing pending: end of stream.
            // A non-empty buffer here means work was lost or
            // duplicated, which is a fatal consistency fault.
            let results = self.buffer.lock();
            if !results.is_empty() {
                self.failed = true;
                return Some(Err(anyhow!(
                    "reorder buffer holds {} undelivered results at end of stream \
                    (lost or duplicated ticket)",
                    results.len()
                )));
            }
            return None;
        }

        // Block until the expected sequence id lands. No timeout by
        // design: a training loop with no next batch has no useful
        // fallback.
        let mut results = self.buffer.lock();
        loop {
            if let Some(result) = results.remove(&self.received) {
                self.received += 1;
                return Some(result);
            }
            results = match self.buffer.ready.wait(results) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

impl Drop for PooledIter {
    fn drop(&mut self) {
        // Shut the pool down first: task channels close, workers
        // finish in-flight tickets and exit, completion senders drop.
        self.pool.take();
        // Then the collector sees the disconnect and exits.
        if let Some(collector) = self.collector.take() {
            let _ = collector.join();
        }
    }
}
