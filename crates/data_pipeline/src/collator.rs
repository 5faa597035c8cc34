//! src/collator.rs
//!
//! Batch collation: "array of structures" to "structure of arrays".
//!
//! The `BatchCollator` transposes a list of transformed samples into a
//! per-field [`Batch`] mapping, runs the ordered batch-level
//! transforms over it, and finishes with the field extractor. The
//! extractor is held as a separate, final stage so "the extractor runs
//! last" is enforced by construction rather than by list discipline.

use crate::extract::{ExtractFields, FeedBatch};
use crate::sample::Sample;
use crate::value::Value;
use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, HashSet};

/// A batch before extraction: field name -> ordered per-sample values.
///
/// Invariant: every per-field vec has length == batch size, in sample
/// order.
#[derive(Debug, Default)]
pub struct Batch {
    pub fields: HashMap<String, Vec<Value>>,
}

impl Batch {
    /// Transposes samples into the per-field mapping. All samples must
    /// agree on their field set; a mismatch is a caller bug surfaced
    /// as an error.
    pub fn from_samples(samples: Vec<Sample>) -> Result<Self> {
        if samples.is_empty() {
            bail!("cannot collate an empty sample list");
        }

        let first_keys: HashSet<&String> = samples[0].fields.keys().collect();
        for (i, sample) in samples.iter().enumerate().skip(1) {
            let missing: Vec<&&String> = first_keys
                .iter()
                .filter(|&&k| !sample.fields.contains_key(k))
                .collect();
            let extra: Vec<&String> = sample
                .fields
                .keys()
                .filter(|k| !first_keys.contains(k))
                .collect();
            if !missing.is_empty() || !extra.is_empty() {
                bail!(
                    "sample #{} has mismatched fields:\n -missing: {:?}\n -extra: {:?}",
                    i,
                    missing,
                    extra
                );
            }
        }

        let mut fields: HashMap<String, Vec<Value>> = HashMap::with_capacity(first_keys.len());
        for sample in samples {
            for (name, value) in sample.fields {
                fields.entry(name).or_default().push(value);
            }
        }
        Ok(Self { fields })
    }

    /// Number of samples in the batch.
    pub fn batch_size(&self) -> usize {
        self.fields.values().next().map(Vec::len).unwrap_or(0)
    }

    /// Per-sample values for one field.
    pub fn get(&self, field: &str) -> Result<&Vec<Value>> {
        self.fields
            .get(field)
            .ok_or_else(|| anyhow!("field '{}' not found in batch", field))
    }

    /// Inserts or replaces a field column.
    pub fn insert(&mut self, field: impl Into<String>, values: Vec<Value>) {
        self.fields.insert(field.into(), values);
    }
}

/// A callable `Batch -> Batch` applied after collation, in declared
/// order (e.g., batch-level padding or target encoding).
pub trait BatchTransform: Send + Sync {
    fn apply(&self, batch: Batch) -> Result<Batch>;
}

/// Collates transformed samples into a [`FeedBatch`]: transpose, run
/// batch transforms in order, then extract the output fields.
pub struct BatchCollator {
    transforms: Vec<Box<dyn BatchTransform>>,
    extractor: ExtractFields,
}

impl BatchCollator {
    pub fn new(transforms: Vec<Box<dyn BatchTransform>>, extractor: ExtractFields) -> Self {
        Self {
            transforms,
            extractor,
        }
    }

    pub fn collate(&self, samples: Vec<Sample>) -> Result<FeedBatch> {
        let mut batch = Batch::from_samples(samples)?;
        for transform in &self.transforms {
            batch = transform.apply(batch)?;
        }
        self.extractor.extract(&batch)
    }
}
