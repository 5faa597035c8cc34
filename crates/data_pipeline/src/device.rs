//! src/device.rs
//!
//! Multi-device coalescing: turns the flat batch stream into one
//! combined unit per training step, one sub-batch per device lane.
//!
//! Tensor materialization is an external concern. The crate only
//! defines the [`TensorMaterializer`] contract (array + optional
//! nested lengths -> reusable tensor handle on a place) and ships a
//! host-memory reference implementation for tests and CPU runs.
//!
//! The awkward case is the end of the stream: when it runs dry with
//! some but not all lanes filled, the leftover lanes' data is
//! concatenated into one combined record and materialized on a single
//! fallback lane on host memory, never a device-private location. The
//! step result is tagged ([`StepBatches`]) so the caller knows which
//! shape it received instead of inferring it.

use anyhow::{anyhow, ensure, Result};
use log::debug;
use std::collections::HashMap;

use crate::dataloader::{DataLoader, LoaderIter};
use crate::extract::{FeedBatch, FeedRecord};
use crate::value::Value;

/// Where a lane's tensors live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePlace {
    Host,
    Device(usize),
}

/// One device-bound execution slot, receiving one sub-batch per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLane {
    pub place: DevicePlace,
}

impl DeviceLane {
    pub fn host() -> Self {
        Self {
            place: DevicePlace::Host,
        }
    }

    pub fn device(ordinal: usize) -> Self {
        Self {
            place: DevicePlace::Device(ordinal),
        }
    }
}

/// Produces or reuses a tensor-like handle for one feed record on a
/// target place. `slot` carries the handle produced for the same field
/// on a previous step, if any, so implementations can overwrite
/// in place instead of reallocating.
///
/// Nested lengths, when present on the record, must be attached to the
/// handle as its ragged-structure metadata.
pub trait TensorMaterializer {
    type Tensor: Clone;

    fn materialize(
        &self,
        place: DevicePlace,
        name: &str,
        record: &FeedRecord,
        slot: Option<Self::Tensor>,
    ) -> Result<Self::Tensor>;
}

/// Host-memory tensor handle: the array plus its attached nested
/// lengths. Reference implementation for tests and CPU-only runs.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub place: DevicePlace,
    pub array: Value,
    pub lod: Option<Vec<Vec<i64>>>,
}

/// [`TensorMaterializer`] that keeps everything in host memory.
#[derive(Debug, Default)]
pub struct HostMaterializer;

impl TensorMaterializer for HostMaterializer {
    type Tensor = HostTensor;

    fn materialize(
        &self,
        place: DevicePlace,
        _name: &str,
        record: &FeedRecord,
        slot: Option<HostTensor>,
    ) -> Result<HostTensor> {
        let mut tensor = slot.unwrap_or(HostTensor {
            place,
            array: Value::List(Vec::new()),
            lod: None,
        });
        tensor.place = place;
        tensor.array = record.array.clone();
        tensor.lod = record.lod.clone();
        Ok(tensor)
    }
}

/// One training step's batch data, tagged by how the stream ended.
pub enum StepBatches<T> {
    /// Every lane received its own sub-batch, materialized on its own
    /// device. One field map per lane, in lane order.
    PerLane(Vec<HashMap<String, T>>),
    /// The stream ran dry mid-step: all pulled lanes' data combined
    /// into a single record on the host fallback lane.
    Coalesced(HashMap<String, T>),
}

/// One training step: the tagged batch data plus auxiliary fields
/// accumulated across all pulled lanes.
pub struct TrainStep<T> {
    pub batches: StepBatches<T>,
    pub extra: HashMap<String, Value>,
}

/// Drives a [`DataLoader`] across several device lanes, one sub-batch
/// per lane per step.
pub struct MultiDeviceLoader<M: TensorMaterializer> {
    loader: DataLoader,
    lanes: Vec<DeviceLane>,
    materializer: M,
    iter: Option<LoaderIter>,
    // One reusable tensor map per lane, matching `lanes` by index.
    caches: Vec<HashMap<String, M::Tensor>>,
    finished: bool,
}

impl<M: TensorMaterializer> MultiDeviceLoader<M> {
    pub fn new(loader: DataLoader, lanes: Vec<DeviceLane>, materializer: M) -> Result<Self> {
        ensure!(!lanes.is_empty(), "at least one device lane is required");
        let caches = lanes.iter().map(|_| HashMap::new()).collect();
        Ok(Self {
            loader,
            lanes,
            materializer,
            iter: None,
            caches,
            finished: false,
        })
    }

    /// Restarts iteration from a fresh pass. The lane tensor caches
    /// survive so handles keep being reused.
    pub fn reset(&mut self) -> Result<()> {
        self.loader.reset()?;
        self.iter = Some(self.loader.iter()?);
        self.finished = false;
        Ok(())
    }

    fn pull(&mut self) -> Result<Option<FeedBatch>> {
        if self.iter.is_none() {
            self.iter = Some(self.loader.iter()?);
        }
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| anyhow!("loader iterator missing"))?;
        iter.next().transpose()
    }

    /// Produces the next training step, or `Ok(None)` once the stream
    /// ends with no lane filled.
    pub fn next_step(&mut self) -> Result<Option<TrainStep<M::Tensor>>> {
        if self.finished {
            return Ok(None);
        }

        let auto_reset = self.loader.config().auto_reset;
        let mut pulled: Vec<FeedBatch> = Vec::with_capacity(self.lanes.len());
        let mut extra: HashMap<String, Value> = HashMap::new();
        let mut drained = false;

        for _ in 0..self.lanes.len() {
            let batch = match self.pull()? {
                Some(batch) => Some(batch),
                None if auto_reset => {
                    debug!("stream exhausted; auto-resetting for a new pass");
                    self.reset()?;
                    self.pull()?
                }
                None => None,
            };
            let Some(batch) = batch else {
                drained = true;
                break;
            };
            for (name, value) in &batch.extra {
                match extra.get_mut(name) {
                    Some(acc) => acc.accumulate(value.clone())?,
                    None => {
                        extra.insert(name.clone(), value.clone());
                    }
                }
            }
            pulled.push(batch);
        }

        if drained && pulled.is_empty() {
            self.finished = true;
            return Ok(None);
        }

        let batches = if drained && pulled.len() != self.lanes.len() {
            // Partial final step: combine the leftovers into one record
            // and keep it on host memory, never a device-private place.
            self.finished = true;
            let combined = coalesce_feed(&pulled)?;
            let mut out = HashMap::with_capacity(combined.len());
            for (name, record) in &combined {
                let tensor =
                    self.materializer
                        .materialize(DevicePlace::Host, name, record, None)?;
                out.insert(name.clone(), tensor);
            }
            StepBatches::Coalesced(out)
        } else {
            let mut per_lane = Vec::with_capacity(pulled.len());
            for (lane_idx, batch) in pulled.iter().enumerate() {
                let place = self.lanes[lane_idx].place;
                let cache = &mut self.caches[lane_idx];
                let mut out = HashMap::with_capacity(batch.feed.len());
                for (name, record) in &batch.feed {
                    let slot = cache.remove(name);
                    let tensor = self.materializer.materialize(place, name, record, slot)?;
                    cache.insert(name.clone(), tensor.clone());
                    out.insert(name.clone(), tensor);
                }
                per_lane.push(out);
            }
            StepBatches::PerLane(per_lane)
        };

        Ok(Some(TrainStep { batches, extra }))
    }
}

/// Concatenates the pulled lanes' feed records per field, in lane
/// order. Nested lengths merge by per-level list extension.
fn coalesce_feed(batches: &[FeedBatch]) -> Result<HashMap<String, FeedRecord>> {
    let first = batches
        .first()
        .ok_or_else(|| anyhow!("cannot coalesce zero batches"))?;

    let mut combined = HashMap::with_capacity(first.feed.len());
    for name in first.feed.keys() {
        let records = batches
            .iter()
            .map(|b| b.feed(name))
            .collect::<Result<Vec<_>>>()?;

        let arrays: Vec<Value> = records.iter().map(|r| r.array.clone()).collect();
        let array = Value::concatenate(&arrays)?;

        let lod = match &records[0].lod {
            None => None,
            Some(first_lod) => {
                let mut merged = first_lod.clone();
                for record in &records[1..] {
                    let other = record.lod.as_ref().ok_or_else(|| {
                        anyhow!("field '{}' has nested lengths on some lanes only", name)
                    })?;
                    ensure!(
                        other.len() == merged.len(),
                        "field '{}' has mismatched nesting depth across lanes",
                        name
                    );
                    for (level, lengths) in merged.iter_mut().zip(other) {
                        level.extend_from_slice(lengths);
                    }
                }
                Some(merged)
            }
        };

        combined.insert(name.clone(), FeedRecord { array, lod });
    }
    Ok(combined)
}
