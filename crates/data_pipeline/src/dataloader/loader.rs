//! src/dataloader/loader.rs
//!
//! The `DataLoader` façade: owns the dataset / sampler / transform
//! chain / collator wiring, chooses single-threaded or pooled
//! iteration per `num_workers`, and exposes restart.
//!
//! Construction is where configuration errors surface (fail fast):
//! - paired sampling requested on a non-indexable dataset
//! - zero `queue_depth` with a worker pool
//!
//! `len()` is only meaningful for indexable datasets; querying it on
//! an iterable dataset is a usage error, not zero.

use anyhow::{anyhow, ensure, Result};
use std::sync::{Arc, Mutex};

use crate::collator::{BatchCollator, BatchTransform};
use crate::dataset::{Dataset, DatasetMode};
use crate::extract::ExtractFields;
use crate::sampler::BatchSampler;
use crate::transform::{SampleTransform, TransformChain};

use super::config::LoaderConfig;
use super::iterator::pooled::PooledIter;
use super::iterator::LoaderIter;
use super::workers::WorkerContext;

/// Coordinates sampling, transformation, collation and extraction
/// into a restartable stream of [`FeedBatch`](crate::extract::FeedBatch)es.
///
/// All collaborators are held behind `Arc`, so iterators own their
/// wiring and the loader can hand out several over its lifetime.
pub struct DataLoader {
    dataset: Arc<dyn Dataset>,
    sampler: Arc<Mutex<dyn BatchSampler>>,
    chain: Arc<TransformChain>,
    collator: Arc<BatchCollator>,
    config: LoaderConfig,
}

impl DataLoader {
    pub fn new(
        dataset: Arc<dyn Dataset>,
        sampler: Box<dyn BatchSampler>,
        sample_transforms: Vec<Arc<dyn SampleTransform>>,
        batch_transforms: Vec<Box<dyn BatchTransform>>,
        extractor: ExtractFields,
        config: LoaderConfig,
    ) -> Result<Self> {
        let chain = TransformChain::new(sample_transforms);

        ensure!(
            !chain.uses_paired_sampling() || dataset.mode() == DatasetMode::Indexable,
            "paired sampling only works with indexable datasets"
        );
        ensure!(
            config.num_workers == 0 || config.queue_depth > 0,
            "queue_depth must be > 0 when using {} workers",
            config.num_workers
        );

        Ok(Self {
            dataset,
            sampler: Arc::new(Mutex::new(BoxedSampler(sampler))),
            chain: Arc::new(chain),
            collator: Arc::new(BatchCollator::new(batch_transforms, extractor)),
            config,
        })
    }

    /// Number of batches in one pass. Usage error for iterable
    /// datasets, which have no fixed length.
    pub fn len(&self) -> Result<usize> {
        ensure!(
            self.dataset.mode() == DatasetMode::Indexable,
            "iterable dataset does not have a fixed length"
        );
        let sampler = self
            .sampler
            .lock()
            .map_err(|_| anyhow!("sampler lock poisoned"))?;
        sampler
            .len()
            .ok_or_else(|| anyhow!("sampler does not report a length"))
    }

    /// Re-arms the sampler (and an iterable dataset's stream) for a
    /// new pass. Safe to call between exhaustion and the next
    /// iteration start.
    pub fn reset(&self) -> Result<()> {
        self.sampler
            .lock()
            .map_err(|_| anyhow!("sampler lock poisoned"))?
            .reset();
        self.dataset.reset()
    }

    /// Creates an iterator over extracted batches: single-threaded
    /// when `num_workers == 0`, pooled otherwise. Both behave
    /// identically to the consumer.
    pub fn iter(&self) -> Result<LoaderIter> {
        if self.config.num_workers == 0 {
            return Ok(LoaderIter::single(
                self.dataset.clone(),
                self.sampler.clone(),
                self.chain.clone(),
                self.collator.clone(),
                self.config.rank,
            ));
        }

        let dataset = self.dataset.clone();
        let chain = self.chain.clone();
        let collator = self.collator.clone();
        let factory = Arc::new(move || WorkerContext {
            dataset: dataset.clone(),
            chain: chain.clone(),
            collator: collator.clone(),
        });

        let max_tasks = if self.config.use_multiprocess {
            Some(self.config.max_tasks_per_worker.max(1))
        } else {
            None
        };

        let pooled = PooledIter::new(
            self.sampler.clone(),
            factory,
            self.chain.needs_batch_seeding(),
            self.config.rank,
            self.config.num_workers,
            self.config.queue_depth,
            max_tasks,
        )?;
        Ok(LoaderIter::pooled(pooled))
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.dataset
    }
}

/// Adapter so a boxed sampler can live behind `Mutex<dyn BatchSampler>`.
struct BoxedSampler(Box<dyn BatchSampler>);

impl BatchSampler for BoxedSampler {
    fn next_group(&mut self) -> Option<crate::sampler::IndexGroup> {
        self.0.next_group()
    }

    fn reset(&mut self) {
        self.0.reset()
    }

    fn len(&self) -> Option<usize> {
        self.0.len()
    }
}
