#![allow(dead_code)]

use anyhow::{anyhow, Result};
use data_pipeline::{
    Dataset, ExtractFields, FeedBatch, FieldSpec, InMemoryDataset, Sample, SampleTransform, Value,
};
use ndarray::{arr1, ArrayD, IxDyn};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Samples with a single scalar "id" field, id == index.
pub fn id_samples(n: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| Sample::from_single("id", Value::scalar_i64(i as i64)))
        .collect()
}

pub fn id_dataset(n: usize) -> Arc<dyn Dataset> {
    Arc::new(InMemoryDataset::new(id_samples(n)))
}

pub fn id_extractor() -> ExtractFields {
    ExtractFields::new(vec![FieldSpec::feed("id")], false).unwrap()
}

/// Reads the "id" feed column back out of an extracted batch.
pub fn batch_ids(batch: &FeedBatch) -> Vec<i32> {
    let record = batch.feed("id").unwrap();
    let Value::I32(a) = &record.array else {
        panic!("expected I32 ids, got {}", record.array.kind());
    };
    a.iter().copied().collect()
}

/// Detection-shaped samples: a fixed-shape image, a ragged list of
/// ground-truth boxes with aligned labels, and an image id.
pub fn detection_samples(n: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            let boxes = i % 3 + 1;
            let image =
                ArrayD::from_shape_fn(IxDyn(&[2, 2]), |d| (i * 10 + d[0] * 2 + d[1]) as f32);
            let gt_box = Value::List(
                (0..boxes)
                    .map(|b| {
                        let x = (i * 10 + b) as f32;
                        Value::F32(arr1(&[x, x + 1.0, x + 2.0, x + 3.0]).into_dyn())
                    })
                    .collect(),
            );
            let labels: Vec<i64> = (0..boxes).map(|b| ((i + b) % 5 + 1) as i64).collect();

            let mut sample = Sample::from_single("image", Value::F32(image));
            sample.insert("gt_box", gt_box);
            sample.insert("gt_label", Value::I64(arr1(&labels).into_dyn()));
            sample.insert("im_id", Value::scalar_i64(i as i64));
            sample
        })
        .collect()
}

pub fn detection_extractor(label_remap: bool) -> Result<ExtractFields> {
    ExtractFields::new(
        vec![
            FieldSpec::feed("image"),
            FieldSpec::feed("gt_box").with_lod_level(1),
            FieldSpec::feed("gt_label").with_lod_level(1),
            FieldSpec::extra("im_id"),
        ],
        label_remap,
    )
}

/// Passthrough transform that sleeps a random amount, so pooled
/// workers finish out of dispatch order.
pub struct SlowTransform {
    pub max_delay_ms: u64,
}

impl SampleTransform for SlowTransform {
    fn apply(&self, sample: Sample) -> Result<Sample> {
        let delay = rand::rng().random_range(0..self.max_delay_ms);
        thread::sleep(Duration::from_millis(delay));
        Ok(sample)
    }
}

/// Counts how many samples have entered the transform chain.
pub struct Started(pub Arc<AtomicUsize>);

impl SampleTransform for Started {
    fn apply(&self, sample: Sample) -> Result<Sample> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(sample)
    }
}

/// Copies the per-batch seed into a regular field so tests can observe
/// which seed each sample saw.
pub struct SeedStamp;

impl SampleTransform for SeedStamp {
    fn apply(&self, mut sample: Sample) -> Result<Sample> {
        let seed = sample
            .batch_seed()
            .ok_or_else(|| anyhow!("batch seed missing"))?;
        sample.insert("seen_seed", Value::scalar_i64(seed as i64));
        Ok(sample)
    }

    fn needs_batch_seed(&self) -> bool {
        true
    }
}

/// Records the secondary sample's id on the primary.
pub struct PairTag;

impl SampleTransform for PairTag {
    fn apply(&self, sample: Sample) -> Result<Sample> {
        Ok(sample)
    }

    fn apply_pair(&self, primary: Sample, secondary: Sample) -> Result<Sample> {
        let id = secondary.get("id")?.clone();
        Ok(primary.with_field("pair_id", id))
    }

    fn paired_sampling(&self) -> bool {
        true
    }
}
