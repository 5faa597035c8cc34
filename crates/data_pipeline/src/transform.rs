//! src/transform.rs
//!
//! Per-sample transforms, the composed transform chain, and the fetch
//! path that turns one dataset index into one transformed sample.
//!
//! Transforms declare their capabilities with explicit flags on the
//! trait rather than being probed for attributes:
//! - `paired_sampling`: the transform combines the primary sample with
//!   a second, distinct sample (blending-style augmentation) and is
//!   invoked through `apply_pair`.
//! - `needs_batch_seed`: the transform reads the reserved
//!   `"batch_seed"` field to make batch-uniform stochastic decisions.

use crate::dataset::{Dataset, DatasetMode};
use crate::sample::{Sample, BATCH_SEED_FIELD};
use crate::value::Value;
use anyhow::{anyhow, bail, ensure, Result};
use rand::Rng;
use std::sync::Arc;

/// A callable `Sample -> Sample` applied per sample, with optional
/// capability flags.
pub trait SampleTransform: Send + Sync {
    fn apply(&self, sample: Sample) -> Result<Sample>;

    /// Invoked instead of `apply` when `paired_sampling()` is true.
    fn apply_pair(&self, _primary: Sample, _secondary: Sample) -> Result<Sample> {
        Err(anyhow!("transform does not accept a paired sample"))
    }

    /// True if this transform needs a second, distinct sample.
    fn paired_sampling(&self) -> bool {
        false
    }

    /// True if this transform needs the per-batch deterministic seed.
    fn needs_batch_seed(&self) -> bool {
        false
    }
}

/// An ordered list of per-sample transforms composed into one callable.
///
/// Capability flags are derived once at construction and cached; the
/// fetch path and the loader consult them without touching the
/// individual transforms again.
pub struct TransformChain {
    transforms: Vec<Arc<dyn SampleTransform>>,
    uses_paired_sampling: bool,
    needs_batch_seeding: bool,
}

impl TransformChain {
    pub fn new(transforms: Vec<Arc<dyn SampleTransform>>) -> Self {
        let uses_paired_sampling = transforms.iter().any(|t| t.paired_sampling());
        let needs_batch_seeding = transforms.iter().any(|t| t.needs_batch_seed());
        Self {
            transforms,
            uses_paired_sampling,
            needs_batch_seeding,
        }
    }

    /// True if any transform in the chain needs a secondary sample.
    pub fn uses_paired_sampling(&self) -> bool {
        self.uses_paired_sampling
    }

    /// True if any transform in the chain needs a per-batch seed.
    pub fn needs_batch_seeding(&self) -> bool {
        self.needs_batch_seeding
    }

    /// Runs the chain over one sample. The secondary sample, when the
    /// chain requires one, is handed to exactly the paired transform;
    /// every other transform sees a single sample. Transform errors
    /// propagate unchanged.
    pub fn apply(&self, sample: Sample, secondary: Option<Sample>) -> Result<Sample> {
        let mut secondary = secondary;
        let mut sample = sample;
        for transform in &self.transforms {
            sample = if transform.paired_sampling() {
                let second = secondary.take().ok_or_else(|| {
                    anyhow!("paired transform invoked without a secondary sample")
                })?;
                transform.apply_pair(sample, second)?
            } else {
                transform.apply(sample)?
            };
        }
        Ok(sample)
    }
}

/// Fetches the sample for one dataset index and runs it through the
/// chain.
///
/// - Iterable datasets ignore the index and pull the next stream item.
/// - Indexable datasets fetch by index; when a `batch_seed` is given
///   it is attached under the reserved field before transforming, so
///   every sample of the batch observes the same seed.
/// - When the chain requires paired sampling, a secondary index is
///   drawn uniformly from all indices except `index`, preferring the
///   dataset's cached raw form when it exposes one.
pub fn fetch_sample(
    dataset: &dyn Dataset,
    index: usize,
    chain: &TransformChain,
    batch_seed: Option<u64>,
) -> Result<Sample> {
    if chain.uses_paired_sampling() && dataset.mode() != DatasetMode::Indexable {
        bail!("paired sampling only works with indexable datasets");
    }

    if dataset.mode() == DatasetMode::Iterable {
        let item = dataset
            .next_item()?
            .ok_or_else(|| anyhow!("stream exhausted before the batch completed"))?;
        return chain.apply(item, None);
    }

    let mut sample = dataset.get(index)?;
    if let Some(seed) = batch_seed {
        sample.insert(BATCH_SEED_FIELD, Value::scalar_i64(seed as i64));
    }

    if chain.uses_paired_sampling() {
        let len = dataset.len()?;
        ensure!(len > 1, "paired sampling needs at least two samples");

        // Uniform over 0..len with `index` excluded, so the secondary
        // sample is always distinct from the primary.
        let mut secondary_index = rand::rng().random_range(0..len - 1);
        if secondary_index >= index {
            secondary_index += 1;
        }

        let secondary = match dataset.cached_raw(secondary_index) {
            Some(raw) => raw,
            None => dataset.get(secondary_index)?,
        };
        return chain.apply(sample, Some(secondary));
    }

    chain.apply(sample, None)
}
