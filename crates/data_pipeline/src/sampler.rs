//! src/sampler.rs
//!
//! The sampler contract consumed by the `DataLoader`: a restartable
//! sequence of index groups, where one group is one batch's worth of
//! dataset indices.
//!
//! The index-generation policy itself is external to this crate; the
//! samplers here cover the common cases (sequential, seeded shuffle,
//! sized dummy groups for iterable datasets) and double as reference
//! implementations for tests.

use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// One batch's worth of dataset indices, in sample order. Immutable
/// once issued.
pub type IndexGroup = Vec<usize>;

/// A restartable producer of index groups.
///
/// Implementations must be `Send` so the loader can hand the sampler
/// to a pooled iterator running on another thread.
pub trait BatchSampler: Send {
    /// Returns the next index group, or `None` when the pass is over.
    fn next_group(&mut self) -> Option<IndexGroup>;

    /// Re-arms the sampler for a new pass. Must be safe to call
    /// between exhaustion and the next iteration start.
    fn reset(&mut self);

    /// Number of groups in one pass, when known.
    fn len(&self) -> Option<usize>;

    fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

fn group_count(num_indices: usize, batch_size: usize, drop_last: bool) -> usize {
    if drop_last {
        num_indices / batch_size
    } else {
        num_indices.div_ceil(batch_size)
    }
}

/// Yields index groups in order `[0..b), [b..2b), ...`.
#[derive(Debug, Clone)]
pub struct SequentialSampler {
    dataset_size: usize,
    batch_size: usize,
    drop_last: bool,
    cursor: usize,
}

impl SequentialSampler {
    pub fn new(dataset_size: usize, batch_size: usize, drop_last: bool) -> Result<Self> {
        ensure!(batch_size > 0, "batch_size must be greater than 0");
        Ok(Self {
            dataset_size,
            batch_size,
            drop_last,
            cursor: 0,
        })
    }
}

impl BatchSampler for SequentialSampler {
    fn next_group(&mut self) -> Option<IndexGroup> {
        if self.cursor >= self.dataset_size {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.dataset_size);
        if self.drop_last && end - self.cursor < self.batch_size {
            return None;
        }
        let group = (self.cursor..end).collect();
        self.cursor = end;
        Some(group)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn len(&self) -> Option<usize> {
        Some(group_count(self.dataset_size, self.batch_size, self.drop_last))
    }
}

/// Seeded uniform shuffle over `0..dataset_size`, chunked into groups.
///
/// The permutation is derived from `base_seed + pass`, so each reset
/// starts a fresh but reproducible shuffle; re-running with the same
/// seed reproduces the same pass sequence.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    order: Vec<usize>,
    batch_size: usize,
    drop_last: bool,
    base_seed: u64,
    pass: u64,
    cursor: usize,
}

impl RandomSampler {
    pub fn new(
        dataset_size: usize,
        batch_size: usize,
        drop_last: bool,
        base_seed: u64,
    ) -> Result<Self> {
        ensure!(batch_size > 0, "batch_size must be greater than 0");
        let mut sampler = Self {
            order: (0..dataset_size).collect(),
            batch_size,
            drop_last,
            base_seed,
            pass: 0,
            cursor: 0,
        };
        sampler.shuffle();
        Ok(sampler)
    }

    fn shuffle(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.base_seed.wrapping_add(self.pass));
        self.order.shuffle(&mut rng);
    }
}

impl BatchSampler for RandomSampler {
    fn next_group(&mut self) -> Option<IndexGroup> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        if self.drop_last && end - self.cursor < self.batch_size {
            return None;
        }
        let group = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        Some(group)
    }

    fn reset(&mut self) {
        self.pass += 1;
        self.cursor = 0;
        self.shuffle();
    }

    fn len(&self) -> Option<usize> {
        Some(group_count(self.order.len(), self.batch_size, self.drop_last))
    }
}

/// Sized dummy groups for iterable datasets, where indices are ignored
/// and only the group size (batch size) and group count matter.
#[derive(Debug, Clone)]
pub struct StreamSampler {
    batch_size: usize,
    num_groups: usize,
    issued: usize,
}

impl StreamSampler {
    pub fn new(batch_size: usize, num_groups: usize) -> Result<Self> {
        ensure!(batch_size > 0, "batch_size must be greater than 0");
        Ok(Self {
            batch_size,
            num_groups,
            issued: 0,
        })
    }
}

impl BatchSampler for StreamSampler {
    fn next_group(&mut self) -> Option<IndexGroup> {
        if self.issued >= self.num_groups {
            return None;
        }
        let start = self.issued * self.batch_size;
        self.issued += 1;
        Some((start..start + self.batch_size).collect())
    }

    fn reset(&mut self) {
        self.issued = 0;
    }

    fn len(&self) -> Option<usize> {
        Some(self.num_groups)
    }
}
