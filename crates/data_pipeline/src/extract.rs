//! src/extract.rs
//!
//! The field extractor: the final collation stage that projects a
//! [`Batch`](crate::collator::Batch) into named output records.
//!
//! Each output spec is either a plain field name or a composite
//! `{name, sources, lod_level}`; specs marked `extra` produce
//! auxiliary data carried alongside the feed (e.g., evaluation
//! metadata) instead of tensor-bound arrays.
//!
//! Variable-length fields (`lod_level > 0`) are recursively flattened
//! to a flat leaf array plus one length list per nesting level
//! (outermost first). The outermost list always equals the batch size
//! and is dropped from the stored record; the remaining lists allow
//! exact reconstruction of the ragged structure.

use crate::collator::Batch;
use crate::value::Value;
use anyhow::{anyhow, bail, ensure, Context, Result};
use std::collections::{HashMap, HashSet};

/// Reserved class-label field targeted by the label-remap quirk.
pub const CLASS_LABEL_FIELD: &str = "gt_label";

/// One source of an output spec: a batch field, or a literal constant
/// (constant-valued pseudo-field, e.g. a fixed image dimension).
#[derive(Debug, Clone)]
pub enum FieldSource {
    Field(String),
    Constant(f64),
}

impl FieldSource {
    pub fn field(name: impl Into<String>) -> Self {
        FieldSource::Field(name.into())
    }

    pub fn constant(value: f64) -> Self {
        FieldSource::Constant(value)
    }
}

/// One named output spec for the extractor.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub sources: Vec<FieldSource>,
    pub lod_level: usize,
    pub extra: bool,
}

impl FieldSpec {
    /// A plain feed field: `{name, sources: [name], lod_level: 0}`.
    pub fn feed(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            sources: vec![FieldSource::Field(name.clone())],
            name,
            lod_level: 0,
            extra: false,
        }
    }

    /// A plain auxiliary field, carried alongside the feed.
    pub fn extra(name: impl Into<String>) -> Self {
        Self {
            extra: true,
            ..Self::feed(name)
        }
    }

    /// Replaces the source list (composite specs).
    pub fn with_sources(mut self, sources: Vec<FieldSource>) -> Self {
        self.sources = sources;
        self
    }

    /// Sets the nesting depth for ragged/sequence fields.
    pub fn with_lod_level(mut self, lod_level: usize) -> Self {
        self.lod_level = lod_level;
        self
    }
}

/// Per output field: the array payload plus the nested-length lists
/// (outermost stored level first) for ragged fields.
#[derive(Debug, Clone)]
pub struct FeedRecord {
    pub array: Value,
    pub lod: Option<Vec<Vec<i64>>>,
}

impl FeedRecord {
    /// Rebuilds the ragged structure described by the length lists:
    /// one list entry per sample at the outermost level, nested lists
    /// of leaf arrays below. Records without length lists return the
    /// payload unchanged.
    pub fn unflatten(&self) -> Result<Value> {
        let Some(lod) = &self.lod else {
            return Ok(self.array.clone());
        };

        let mut items = self.array.sequence_items()?;
        for level in lod.iter().rev() {
            let mut grouped = Vec::with_capacity(level.len());
            let mut rest = items.into_iter();
            for &len in level {
                let chunk: Vec<Value> = rest.by_ref().take(len as usize).collect();
                ensure!(
                    chunk.len() == len as usize,
                    "length list inconsistent with payload"
                );
                grouped.push(Value::List(chunk));
            }
            ensure!(
                rest.next().is_none(),
                "length list inconsistent with payload"
            );
            items = grouped;
        }
        Ok(Value::List(items))
    }
}

/// The extracted output of one batch: `feed` (tensor-bound records)
/// and `extra` (auxiliary side-channel).
#[derive(Debug, Default)]
pub struct FeedBatch {
    pub feed: HashMap<String, FeedRecord>,
    pub extra: HashMap<String, Value>,
}

impl FeedBatch {
    pub fn feed(&self, name: &str) -> Result<&FeedRecord> {
        self.feed
            .get(name)
            .ok_or_else(|| anyhow!("feed field '{}' not found", name))
    }
}

/// Projects a collated batch into [`FeedBatch`] records according to
/// a list of output specs.
pub struct ExtractFields {
    specs: Vec<FieldSpec>,
    label_remap: bool,
}

impl ExtractFields {
    pub fn new(specs: Vec<FieldSpec>, label_remap: bool) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in &specs {
            ensure!(
                seen.insert(spec.name.as_str()),
                "duplicate output spec '{}'",
                spec.name
            );
            ensure!(
                !spec.sources.is_empty(),
                "output spec '{}' has no sources",
                spec.name
            );
            if spec.lod_level > 0 {
                ensure!(
                    spec.sources
                        .iter()
                        .all(|s| matches!(s, FieldSource::Field(_))),
                    "output spec '{}': constants are only valid at lod_level 0",
                    spec.name
                );
            }
        }
        Ok(Self { specs, label_remap })
    }

    pub fn extract(&self, batch: &Batch) -> Result<FeedBatch> {
        let mut out = FeedBatch::default();

        for spec in &self.specs {
            let mut arr_list: Vec<Value> = Vec::with_capacity(spec.sources.len());
            let mut seq_length: Option<Vec<Vec<i64>>> = None;

            for source in &spec.sources {
                let values = match source {
                    FieldSource::Constant(c) => {
                        arr_list.push(Value::scalar_f64(*c));
                        continue;
                    }
                    FieldSource::Field(f) => {
                        let mut values = batch.get(f)?.clone();
                        if self.label_remap && f == CLASS_LABEL_FIELD {
                            values = values
                                .into_iter()
                                .map(remap_class_labels)
                                .collect::<Result<_>>()?;
                        }
                        values
                    }
                };

                if spec.lod_level == 0 {
                    // Stack only feed fields or combined sources; lone
                    // auxiliary columns stay as lists.
                    if (!spec.extra || spec.sources.len() > 1) && stackable(&values) {
                        arr_list.push(Value::stack(&values).with_context(|| {
                            format!("failed to stack values for '{}'", spec.name)
                        })?);
                    } else {
                        arr_list.push(Value::List(values));
                    }
                    continue;
                }

                if !spec.extra {
                    let (flat, lengths) =
                        flatten_with_lengths(&Value::List(values), spec.lod_level + 1)
                            .with_context(|| format!("failed to flatten '{}'", spec.name))?;
                    arr_list.push(Value::stack(&flat).with_context(|| {
                        format!("ragged leaves of '{}' are not stackable", spec.name)
                    })?);
                    seq_length = Some(lengths);
                }
            }

            // Combine multi-source specs column-wise.
            let combined = if arr_list.len() == 1 {
                arr_list.pop().ok_or_else(|| anyhow!("empty source list"))?
            } else {
                let columns = Value::column_stack(&arr_list)
                    .with_context(|| format!("failed to combine sources of '{}'", spec.name))?;
                if spec.extra {
                    Value::List(vec![columns])
                } else {
                    columns
                }
            };

            if spec.extra {
                out.extra.insert(spec.name.clone(), combined);
                continue;
            }

            // The outermost level length equals the batch size and is
            // implicit; only the inner levels are kept.
            let lod = seq_length.map(|mut levels| {
                levels.remove(0);
                levels
            });

            let array = match combined {
                Value::List(items) => Value::stack(&items)
                    .with_context(|| format!("feed field '{}' is not array-like", spec.name))?,
                array => array,
            };

            out.feed.insert(
                spec.name.clone(),
                FeedRecord {
                    array: array.narrow_cast(),
                    lod,
                },
            );
        }

        Ok(out)
    }
}

/// True when every value is an array of the same kind and shape.
fn stackable(values: &[Value]) -> bool {
    let Some(first) = values.first() else {
        return false;
    };
    if !first.is_array() {
        return false;
    }
    let kind = first.kind();
    let shape = first.shape().ok();
    values
        .iter()
        .all(|v| v.kind() == kind && v.shape().ok() == shape)
}

/// Dataset-specific quirk: shift class ids down by one, floored at
/// zero (datasets whose label space starts at 1 with 0 = background).
fn remap_class_labels(value: Value) -> Result<Value> {
    match value {
        Value::I32(a) => Ok(Value::I32(a.mapv(|x| (x - 1).max(0)))),
        Value::I64(a) => Ok(Value::I64(a.mapv(|x| (x - 1).max(0)))),
        other => bail!("label remap expects integer labels, got {}", other.kind()),
    }
}

/// Recursively flattens `value` to depth `levels`, recording at each
/// nesting level the length of every element (outermost first).
/// Returns the flat leaf values plus one length list per level.
fn flatten_with_lengths(value: &Value, levels: usize) -> Result<(Vec<Value>, Vec<Vec<i64>>)> {
    let mut flat = Vec::new();
    let mut lengths = vec![Vec::new(); levels];
    descend(value, 0, levels, &mut flat, &mut lengths)?;
    Ok((flat, lengths))
}

fn descend(
    value: &Value,
    level: usize,
    levels: usize,
    flat: &mut Vec<Value>,
    lengths: &mut [Vec<i64>],
) -> Result<()> {
    if level == levels {
        flat.push(value.clone());
        return Ok(());
    }
    lengths[level].push(value.sequence_len()? as i64);
    for item in value.sequence_items()? {
        descend(&item, level + 1, levels, flat, lengths)?;
    }
    Ok(())
}
