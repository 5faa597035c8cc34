//! src/dataset.rs
//!
//! The `Dataset` contract consumed by the pipeline.
//!
//! Concrete readers (file/database backed) live outside this crate;
//! here we define the capability surface the loader relies on, plus
//! two reference implementations used in tests and demos:
//! - `InMemoryDataset`: indexable, random access over `Arc`-shared samples
//! - `StreamDataset`: iterable, next-item pull with restartable sources
//!
//! A dataset declares its access mode with an explicit tag rather than
//! being probed for capabilities at runtime.

use crate::sample::Sample;
use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

/// Explicit access-mode tag for a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetMode {
    /// Random access by index; has a fixed length.
    Indexable,
    /// Sequential next-item pull; no fixed length, no random access.
    Iterable,
}

/// Unified access to data samples.
///
/// All implementations must be `Send + Sync` so one dataset instance
/// can be shared across worker threads behind an `Arc`.
pub trait Dataset: Send + Sync {
    /// Access mode of this dataset.
    fn mode(&self) -> DatasetMode;

    /// Total number of samples. Errors for iterable datasets.
    fn len(&self) -> Result<usize>;

    /// Random-access lookup by index. Errors for iterable datasets.
    fn get(&self, index: usize) -> Result<Sample>;

    /// Pulls the next sample from an iterable dataset's stream.
    /// Returns `Ok(None)` once the stream is exhausted.
    /// Errors for indexable datasets.
    fn next_item(&self) -> Result<Option<Sample>>;

    /// Optional capability: a cheap cached raw form of the sample at
    /// `index`, used by paired sampling to avoid deep-copying heavy
    /// fields for the read-only secondary sample. Datasets without a
    /// raw cache return `None` and the general `get` path is used.
    fn cached_raw(&self, _index: usize) -> Option<Sample> {
        None
    }

    /// Re-arms the dataset for a new pass. A no-op for indexable
    /// datasets; iterable datasets restart their stream.
    fn reset(&self) -> Result<()> {
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.len().map(|l| l == 0).unwrap_or(false)
    }
}

/// An indexable dataset holding all samples in memory.
///
/// Cloning only bumps the `Arc` counter, so the same storage is shared
/// zero-copy across worker threads.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    samples: Arc<[Sample]>,
}

impl InMemoryDataset {
    /// Creates a new in-memory dataset from a vector of samples.
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: samples.into(),
        }
    }
}

impl Dataset for InMemoryDataset {
    fn mode(&self) -> DatasetMode {
        DatasetMode::Indexable
    }

    fn len(&self) -> Result<usize> {
        Ok(self.samples.len())
    }

    fn get(&self, index: usize) -> Result<Sample> {
        self.samples
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("index {} out of bounds (len {})", index, self.samples.len()))
    }

    fn next_item(&self) -> Result<Option<Sample>> {
        Err(anyhow!("indexable dataset has no item stream; use get()"))
    }

    fn cached_raw(&self, index: usize) -> Option<Sample> {
        // Samples are already resident; hand out a clone of the stored
        // form without re-running any load path.
        self.samples.get(index).cloned()
    }
}

/// Factory producing one pass over an iterable data source.
pub type SampleStream = Box<dyn Iterator<Item = Result<Sample>> + Send>;

/// An iterable dataset wrapping a restartable stream factory.
///
/// The current stream position is interior state guarded by a mutex:
/// `next_item` is a pull on a shared cursor, which matches the
/// iterable contract (indices are ignored, order is the stream's).
pub struct StreamDataset {
    make_stream: Box<dyn Fn() -> Result<SampleStream> + Send + Sync>,
    current: Mutex<Option<SampleStream>>,
}

impl StreamDataset {
    pub fn new<F>(make_stream: F) -> Self
    where
        F: Fn() -> Result<SampleStream> + Send + Sync + 'static,
    {
        Self {
            make_stream: Box::new(make_stream),
            current: Mutex::new(None),
        }
    }
}

impl Dataset for StreamDataset {
    fn mode(&self) -> DatasetMode {
        DatasetMode::Iterable
    }

    fn len(&self) -> Result<usize> {
        Err(anyhow!("iterable dataset does not have a fixed length"))
    }

    fn get(&self, _index: usize) -> Result<Sample> {
        Err(anyhow!("iterable dataset does not support random access"))
    }

    fn next_item(&self) -> Result<Option<Sample>> {
        let mut guard = self
            .current
            .lock()
            .map_err(|_| anyhow!("stream cursor poisoned"))?;
        if guard.is_none() {
            *guard = Some((self.make_stream)()?);
        }
        match guard.as_mut().and_then(|s| s.next()) {
            Some(item) => item.map(Some),
            None => Ok(None),
        }
    }

    fn reset(&self) -> Result<()> {
        let mut guard = self
            .current
            .lock()
            .map_err(|_| anyhow!("stream cursor poisoned"))?;
        *guard = Some((self.make_stream)()?);
        Ok(())
    }
}
