//! src/sample.rs
//!
//! The `Sample` struct represents a single data example flowing through
//! the pipeline: a mapping from field names (e.g., `"image"`,
//! `"gt_box"`, `"gt_label"`) to their [`Value`]s.
//!
//! Samples are produced by the dataset, mutated by each transform in
//! the chain (transforms may add, replace or remove fields), and
//! consumed by the collator. One sample is one dispatch unit; it is
//! discarded after its batch has been collated.

use crate::value::Value;
use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// Reserved field carrying the per-batch deterministic seed. Every
/// sample of the same batch observes the same value, enabling
/// batch-uniform stochastic decisions (e.g., a shared random shape).
pub const BATCH_SEED_FIELD: &str = "batch_seed";

/// A single data example: field name -> [`Value`].
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub fields: HashMap<String, Value>,
}

impl Sample {
    /// Creates a new `Sample` from a full field map.
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self { fields }
    }

    /// Creates a `Sample` from a single `(field_name, value)` pair.
    ///
    /// Chain with [`with_field`](Self::with_field) to add more fields.
    pub fn from_single(name: impl Into<String>, value: Value) -> Self {
        Self {
            fields: HashMap::from([(name.into(), value)]),
        }
    }

    /// Adds or overwrites a field in the `Sample`.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Inserts or replaces a field in place.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Returns a reference to the value by field name.
    pub fn get(&self, field: &str) -> Result<&Value> {
        self.fields
            .get(field)
            .ok_or_else(|| anyhow!("field '{}' not found in sample", field))
    }

    /// Removes and returns a field, if present.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Returns an iterator over all field names in this `Sample`.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// The per-batch seed attached by the fetch path, if any.
    pub fn batch_seed(&self) -> Option<u64> {
        match self.fields.get(BATCH_SEED_FIELD) {
            Some(Value::I64(a)) if a.ndim() == 0 => Some(a[ndarray::IxDyn(&[])] as u64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod sample_tests {
    use super::*;

    #[test]
    fn test_sample_basic_construction() -> Result<()> {
        let sample = Sample::from_single("image", Value::scalar_f64(1.0))
            .with_field("gt_label", Value::scalar_i64(3));

        assert_eq!(sample.get("gt_label")?.kind(), "I64");
        assert!(sample.get("missing").is_err());

        let fields: Vec<_> = sample.field_names().collect();
        assert!(fields.contains(&"image"));
        assert!(fields.contains(&"gt_label"));
        Ok(())
    }

    #[test]
    fn test_batch_seed_round_trip() {
        let mut sample = Sample::default();
        assert_eq!(sample.batch_seed(), None);
        sample.insert(BATCH_SEED_FIELD, Value::scalar_i64(42));
        assert_eq!(sample.batch_seed(), Some(42));
    }
}
