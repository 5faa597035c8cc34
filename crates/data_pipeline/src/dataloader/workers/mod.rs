//! src/dataloader/workers/mod.rs
//!
//! Ticket execution: the worker side of the pooled iterator.
//!
//! A ticket is one sequence-numbered unit of work (one index group).
//! Workers turn tickets into extracted batches and push
//! `(sequence id, result)` pairs onto the shared completion channel;
//! they never talk to each other.
//!
//! Two execution models share the same pool and contracts:
//! - **shared** workers hold one common [`WorkerContext`] for the
//!   pool's lifetime;
//! - **isolated** workers build a private context from a factory at
//!   startup and retire it after a bounded number of completed
//!   tickets, rebuilding a fresh one. This is the process-pool
//!   execution model (bounded per-worker lifetime against memory
//!   growth), run in-process because datasets and transforms are not
//!   serializable across address spaces.

pub(crate) mod pool;

use crate::collator::BatchCollator;
use crate::dataset::Dataset;
use crate::extract::FeedBatch;
use crate::sampler::IndexGroup;
use crate::transform::{fetch_sample, TransformChain};
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use log::debug;
use std::sync::Arc;

use pool::WorkerPool;

/// One unit of dispatched, sequence-numbered work. Created by the
/// dispatcher, consumed exactly once by a worker.
#[derive(Debug)]
pub(crate) struct Ticket {
    pub(crate) seq: u64,
    pub(crate) indices: IndexGroup,
    pub(crate) batch_seed: Option<u64>,
}

/// Completion record delivered to the collector.
pub(crate) type Completion = (u64, Result<FeedBatch>);

/// Everything a worker needs to turn a ticket into a batch. Explicit
/// state passed to every incarnation, never ambient.
pub(crate) struct WorkerContext {
    pub(crate) dataset: Arc<dyn Dataset>,
    pub(crate) chain: Arc<TransformChain>,
    pub(crate) collator: Arc<BatchCollator>,
}

impl WorkerContext {
    /// Fetches, transforms and collates one ticket's index group.
    /// The intermediate samples are exclusively owned here until the
    /// result is handed to the collector.
    fn process(&self, ticket: &Ticket) -> Result<FeedBatch> {
        let samples = ticket
            .indices
            .iter()
            .map(|&index| {
                fetch_sample(
                    self.dataset.as_ref(),
                    index,
                    &self.chain,
                    ticket.batch_seed,
                )
                .with_context(|| format!("failed to load sample at index {}", index))
            })
            .collect::<Result<Vec<_>>>()?;
        self.collator.collate(samples)
    }
}

/// Builds one [`WorkerContext`] per worker incarnation.
pub(crate) type ContextFactory = Arc<dyn Fn() -> WorkerContext + Send + Sync>;

/// Spawns the worker set for the pooled iterator.
///
/// `max_tasks_per_worker = None` selects the shared model (one
/// context, unbounded worker lifetime); `Some(n)` selects the
/// isolated model (private context rebuilt every `n` tickets).
pub(crate) fn spawn_workers(
    num_workers: usize,
    queue_depth: usize,
    factory: ContextFactory,
    completion_tx: Sender<Completion>,
    max_tasks_per_worker: Option<usize>,
) -> Result<WorkerPool<Ticket>> {
    match max_tasks_per_worker {
        None => {
            let context = Arc::new(factory());
            WorkerPool::new(num_workers, queue_depth, move |worker_id, task_rx| {
                run_worker(worker_id, &context, &task_rx, &completion_tx, None);
            })
        }
        Some(max_tasks) => WorkerPool::new(num_workers, queue_depth, move |worker_id, task_rx| {
            loop {
                let context = factory();
                let recycled =
                    run_worker(worker_id, &context, &task_rx, &completion_tx, Some(max_tasks));
                if !recycled {
                    break;
                }
                debug!(
                    "worker {} retired its context after {} tickets",
                    worker_id, max_tasks
                );
            }
        }),
    }
}

/// Processes tickets until the task channel closes, the consumer goes
/// away, or (isolated model) the ticket limit is reached. Returns
/// true when the worker should be recycled with a fresh context.
fn run_worker(
    worker_id: usize,
    context: &WorkerContext,
    task_rx: &Receiver<Ticket>,
    completion_tx: &Sender<Completion>,
    limit: Option<usize>,
) -> bool {
    let mut completed = 0usize;
    while let Ok(ticket) = task_rx.recv() {
        let seq = ticket.seq;
        let result = context
            .process(&ticket)
            .with_context(|| format!("worker {} failed on batch {}", worker_id, seq));

        if completion_tx.send((seq, result)).is_err() {
            // Consumer dropped the completion channel; nothing left
            // to deliver to.
            return false;
        }

        completed += 1;
        if limit.is_some_and(|max| completed >= max) {
            return true;
        }
    }
    false
}
