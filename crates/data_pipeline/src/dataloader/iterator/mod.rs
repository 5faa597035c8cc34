//! src/dataloader/iterator/mod.rs
//!
//! Iterator implementations for the `DataLoader`.
//!
//! Two variants behind one public type, chosen by worker count:
//! - `Single`: fully synchronous; each `next()` performs
//!   fetch + transform + collate + extract inline.
//! - `Pooled`: bounded worker pool with ordered batch prefetching
//!   (see `pooled.rs`).
//!
//! Both variants honor batch seeding the same way and are
//! indistinguishable to the consumer apart from latency.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

use crate::collator::BatchCollator;
use crate::dataset::Dataset;
use crate::extract::FeedBatch;
use crate::sampler::BatchSampler;
use crate::transform::{fetch_sample, TransformChain};

pub(crate) mod pooled;

use pooled::PooledIter;

/// Iterator over extracted batches, created by
/// [`DataLoader::iter()`](crate::dataloader::DataLoader::iter).
pub struct LoaderIter {
    inner: IterImpl,
}

enum IterImpl {
    Single(SingleIter),
    Pooled(PooledIter),
}

impl LoaderIter {
    pub(crate) fn single(
        dataset: Arc<dyn Dataset>,
        sampler: Arc<Mutex<dyn BatchSampler>>,
        chain: Arc<TransformChain>,
        collator: Arc<BatchCollator>,
        rank: u64,
    ) -> Self {
        Self {
            inner: IterImpl::Single(SingleIter {
                dataset,
                sampler,
                chain,
                collator,
                rank,
                batch_idx: 0,
            }),
        }
    }

    pub(crate) fn pooled(iter: PooledIter) -> Self {
        Self {
            inner: IterImpl::Pooled(iter),
        }
    }
}

impl Iterator for LoaderIter {
    type Item = Result<FeedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterImpl::Single(iter) => iter.next_batch(),
            IterImpl::Pooled(iter) => iter.next_batch(),
        }
    }
}

/// Single-threaded inline iteration: no extra concurrency, the caller
/// blocks for the full fetch/collate duration of each batch.
struct SingleIter {
    dataset: Arc<dyn Dataset>,
    sampler: Arc<Mutex<dyn BatchSampler>>,
    chain: Arc<TransformChain>,
    collator: Arc<BatchCollator>,
    rank: u64,
    batch_idx: u64,
}

impl SingleIter {
    fn batch_seed(&self) -> Option<u64> {
        if self.chain.needs_batch_seeding() {
            Some((self.batch_idx + 1) * (self.rank + 1))
        } else {
            None
        }
    }

    fn next_batch(&mut self) -> Option<Result<FeedBatch>> {
        let group = {
            let mut sampler = match self.sampler.lock() {
                Ok(guard) => guard,
                Err(_) => return Some(Err(anyhow!("sampler lock poisoned"))),
            };
            sampler.next_group()
        };
        let indices = group?;
        let seed = self.batch_seed();

        let samples: Result<Vec<_>> = indices
            .iter()
            .map(|&index| fetch_sample(self.dataset.as_ref(), index, &self.chain, seed))
            .collect();

        self.batch_idx += 1;
        match samples {
            Ok(samples) => Some(self.collator.collate(samples)),
            Err(e) => Some(Err(e)),
        }
    }
}
