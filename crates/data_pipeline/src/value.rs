//! src/value.rs
//!
//! Field value model for the pipeline.
//!
//! A `Value` is what a dataset stores under one field name: a typed
//! n-dimensional array, or a nested list of values for ragged data
//! (e.g., a variable number of ground-truth boxes per image). Scalars
//! are represented as 0-dim arrays.
//!
//! The batching operations defined here (`stack`, `concatenate`,
//! `column_stack`) are the array-level building blocks used by the
//! collator, the field extractor, and the multi-device coalescer.

use anyhow::{anyhow, bail, Result};
use ndarray::{ArrayD, Axis, IxDyn};

/// One field value inside a [`Sample`](crate::sample::Sample) or batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    /// Nested sequence of values (ragged data). Nesting depth is
    /// described to the extractor via `lod_level`.
    List(Vec<Value>),
}

impl From<ArrayD<f32>> for Value {
    fn from(a: ArrayD<f32>) -> Self {
        Value::F32(a)
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(a: ArrayD<f64>) -> Self {
        Value::F64(a)
    }
}

impl From<ArrayD<i32>> for Value {
    fn from(a: ArrayD<i32>) -> Self {
        Value::I32(a)
    }
}

impl From<ArrayD<i64>> for Value {
    fn from(a: ArrayD<i64>) -> Self {
        Value::I64(a)
    }
}

/// Stacks same-kind, same-shape array values along a new leading axis.
macro_rules! stack_values {
    ($variant:ident, $values:expr) => {{
        let views = $values
            .iter()
            .map(|v| match v {
                Value::$variant(a) => Ok(a.view()),
                other => Err(anyhow!(
                    "cannot stack mixed value kinds ({} vs {})",
                    stringify!($variant),
                    other.kind()
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::$variant(ndarray::stack(Axis(0), &views)?))
    }};
}

macro_rules! concat_values {
    ($variant:ident, $values:expr) => {{
        let views = $values
            .iter()
            .map(|v| match v {
                Value::$variant(a) => Ok(a.view()),
                other => Err(anyhow!(
                    "cannot concatenate mixed value kinds ({} vs {})",
                    stringify!($variant),
                    other.kind()
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::$variant(ndarray::concatenate(Axis(0), &views)?))
    }};
}

impl Value {
    /// Creates a 0-dim (scalar) `F64` value.
    pub fn scalar_f64(x: f64) -> Self {
        Value::F64(ArrayD::from_elem(IxDyn(&[]), x))
    }

    /// Creates a 0-dim (scalar) `I64` value.
    pub fn scalar_i64(x: i64) -> Self {
        Value::I64(ArrayD::from_elem(IxDyn(&[]), x))
    }

    /// Human-readable kind tag, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::F32(_) => "F32",
            Value::F64(_) => "F64",
            Value::I32(_) => "I32",
            Value::I64(_) => "I64",
            Value::List(_) => "List",
        }
    }

    /// True for array variants (everything but `List`).
    pub fn is_array(&self) -> bool {
        !matches!(self, Value::List(_))
    }

    /// Shape of an array value; errors for lists.
    pub fn shape(&self) -> Result<&[usize]> {
        match self {
            Value::F32(a) => Ok(a.shape()),
            Value::F64(a) => Ok(a.shape()),
            Value::I32(a) => Ok(a.shape()),
            Value::I64(a) => Ok(a.shape()),
            Value::List(_) => bail!("list value has no array shape"),
        }
    }

    /// Number of items along the outermost level: list length, or the
    /// leading axis of an array. Errors for scalars, which cannot be
    /// descended into.
    pub fn sequence_len(&self) -> Result<usize> {
        match self {
            Value::List(items) => Ok(items.len()),
            v => {
                let shape = v.shape()?;
                shape
                    .first()
                    .copied()
                    .ok_or_else(|| anyhow!("cannot treat a scalar as a sequence"))
            }
        }
    }

    /// Splits off the outermost level: list items, or the sub-arrays
    /// along the leading axis.
    pub fn sequence_items(&self) -> Result<Vec<Value>> {
        match self {
            Value::List(items) => Ok(items.clone()),
            Value::F32(a) => Self::split_outer(a, Value::F32),
            Value::F64(a) => Self::split_outer(a, Value::F64),
            Value::I32(a) => Self::split_outer(a, Value::I32),
            Value::I64(a) => Self::split_outer(a, Value::I64),
        }
    }

    fn split_outer<A: Clone>(a: &ArrayD<A>, wrap: fn(ArrayD<A>) -> Value) -> Result<Vec<Value>> {
        if a.ndim() == 0 {
            bail!("cannot treat a scalar as a sequence");
        }
        Ok(a.outer_iter().map(|sub| wrap(sub.to_owned())).collect())
    }

    /// Stacks array values of identical kind and shape into one array
    /// with a new leading batch axis. Scalars stack into a 1-D array.
    pub fn stack(values: &[Value]) -> Result<Value> {
        let first = values
            .first()
            .ok_or_else(|| anyhow!("cannot stack an empty value list"))?;
        match first {
            Value::F32(_) => stack_values!(F32, values),
            Value::F64(_) => stack_values!(F64, values),
            Value::I32(_) => stack_values!(I32, values),
            Value::I64(_) => stack_values!(I64, values),
            Value::List(_) => bail!("cannot stack list values"),
        }
    }

    /// Concatenates array values of identical kind along axis 0.
    pub fn concatenate(values: &[Value]) -> Result<Value> {
        let first = values
            .first()
            .ok_or_else(|| anyhow!("cannot concatenate an empty value list"))?;
        match first {
            Value::F32(_) => concat_values!(F32, values),
            Value::F64(_) => concat_values!(F64, values),
            Value::I32(_) => concat_values!(I32, values),
            Value::I64(_) => concat_values!(I64, values),
            Value::List(_) => bail!("cannot concatenate list values"),
        }
    }

    /// Normalizes feed precision: `F64 -> F32` and `I64 -> I32`.
    /// Other kinds pass through unchanged.
    pub fn narrow_cast(self) -> Value {
        match self {
            Value::F64(a) => Value::F32(a.mapv(|x| x as f32)),
            Value::I64(a) => Value::I32(a.mapv(|x| x as i32)),
            other => other,
        }
    }

    /// Converts any array value to an `f64` array (lists rejected).
    pub fn to_f64_array(&self) -> Result<ArrayD<f64>> {
        match self {
            Value::F32(a) => Ok(a.mapv(f64::from)),
            Value::F64(a) => Ok(a.clone()),
            Value::I32(a) => Ok(a.mapv(f64::from)),
            Value::I64(a) => Ok(a.mapv(|x| x as f64)),
            Value::List(_) => bail!("cannot convert a list value to an array"),
        }
    }

    /// Broadcasts the given values to a common row count and combines
    /// them column-wise into one 2-D `F64` array.
    ///
    /// Accepts scalars (broadcast down the rows), 1-D arrays (one
    /// column each) and 2-D arrays (their columns are kept). All row
    /// counts must agree, or be 1/scalar and broadcastable.
    pub fn column_stack(values: &[Value]) -> Result<Value> {
        if values.is_empty() {
            bail!("cannot column-stack an empty value list");
        }

        let arrays = values
            .iter()
            .map(Value::to_f64_array)
            .collect::<Result<Vec<_>>>()?;

        // Common row count across non-scalar inputs.
        let rows = arrays
            .iter()
            .filter(|a| a.ndim() > 0)
            .map(|a| a.shape()[0])
            .max()
            .unwrap_or(1);

        let mut columns = Vec::with_capacity(arrays.len());
        for a in arrays {
            let column = match a.ndim() {
                0 => ArrayD::from_elem(IxDyn(&[rows, 1]), a[IxDyn(&[])]),
                1 => {
                    let len = a.shape()[0];
                    if len == rows {
                        a.into_shape_with_order(IxDyn(&[rows, 1]))?
                    } else if len == 1 {
                        ArrayD::from_elem(IxDyn(&[rows, 1]), a[IxDyn(&[0])])
                    } else {
                        bail!(
                            "cannot broadcast column of {} rows against {} rows",
                            len,
                            rows
                        );
                    }
                }
                2 => {
                    let (r, k) = (a.shape()[0], a.shape()[1]);
                    if r == rows {
                        a
                    } else if r == 1 {
                        a.broadcast(IxDyn(&[rows, k]))
                            .ok_or_else(|| anyhow!("failed to broadcast 1-row array"))?
                            .to_owned()
                    } else {
                        bail!("cannot broadcast {} rows against {} rows", r, rows);
                    }
                }
                n => bail!("column_stack supports at most 2-D inputs, got {}-D", n),
            };
            columns.push(column);
        }

        let views: Vec<_> = columns.iter().map(|c| c.view()).collect();
        Ok(Value::F64(ndarray::concatenate(Axis(1), &views)?))
    }

    /// Accumulates auxiliary data across coalesced batches with `+=`
    /// semantics: lists are extended, arrays are concatenated.
    pub fn accumulate(&mut self, other: Value) -> Result<()> {
        match (&mut *self, other) {
            (Value::List(items), Value::List(more)) => {
                items.extend(more);
                Ok(())
            }
            (current, incoming) if current.is_array() && incoming.is_array() => {
                *current = Value::concatenate(&[current.clone(), incoming])?;
                Ok(())
            }
            (current, incoming) => bail!(
                "cannot accumulate {} into {}",
                incoming.kind(),
                current.kind()
            ),
        }
    }
}
