mod common;

use anyhow::Result;
use data_pipeline::{
    BatchCollator, FieldSource, FieldSpec, ExtractFields, Value,
};

use common::{detection_extractor, detection_samples};

#[test]
fn test_detection_batch_end_to_end() -> Result<()> {
    common::init_logging();

    let collator = BatchCollator::new(Vec::new(), detection_extractor(false)?);
    let out = collator.collate(detection_samples(4))?;

    // Fixed-shape images stack along a new batch axis.
    let image = out.feed("image")?;
    assert_eq!(image.array.shape()?, &[4, 2, 2]);
    assert!(image.lod.is_none());

    // Box counts per sample: 1, 2, 3, 1.
    let gt_box = out.feed("gt_box")?;
    assert_eq!(gt_box.array.shape()?, &[7, 4]);
    assert_eq!(gt_box.lod.as_deref(), Some(&[vec![1, 2, 3, 1]][..]));

    // Labels flatten alongside the boxes, one per box.
    let gt_label = out.feed("gt_label")?;
    assert_eq!(gt_label.array.shape()?, &[7]);
    assert_eq!(gt_label.lod.as_deref(), Some(&[vec![1, 2, 3, 1]][..]));

    // Auxiliary image ids stay as an untouched per-sample list.
    let Value::List(ids) = &out.extra["im_id"] else {
        panic!("expected per-sample list");
    };
    assert_eq!(ids.len(), 4);
    assert_eq!(ids[3], Value::scalar_i64(3));
    Ok(())
}

#[test]
fn test_ragged_round_trip_through_collation() -> Result<()> {
    let collator = BatchCollator::new(Vec::new(), detection_extractor(false)?);
    let samples = detection_samples(5);
    let expected: Vec<Value> = samples
        .iter()
        .map(|s| s.get("gt_box").unwrap().clone())
        .collect();

    let out = collator.collate(samples)?;
    let rebuilt = out.feed("gt_box")?.unflatten()?;

    let Value::List(per_sample) = rebuilt else {
        panic!("expected per-sample list");
    };
    assert_eq!(per_sample.len(), 5);
    for (got, want) in per_sample.iter().zip(&expected) {
        assert_eq!(got, want);
    }
    Ok(())
}

#[test]
fn test_label_remap_applied_before_flatten() -> Result<()> {
    let collator = BatchCollator::new(Vec::new(), detection_extractor(true)?);
    let samples = detection_samples(3);

    // Sample 0 has one box with label (0 + 0) % 5 + 1 = 1; remap
    // shifts it to 0.
    let out = collator.collate(samples)?;
    let Value::I32(labels) = &out.feed("gt_label")?.array else {
        panic!("expected I32 labels after cast");
    };
    assert_eq!(labels[[0]], 0);
    assert!(labels.iter().all(|&l| l >= 0));
    Ok(())
}

#[test]
fn test_composite_shape_spec_with_constant_channel() -> Result<()> {
    let extractor = ExtractFields::new(
        vec![
            FieldSpec::feed("im_shape").with_sources(vec![
                FieldSource::field("h"),
                FieldSource::field("w"),
                FieldSource::constant(3.0),
            ]),
        ],
        false,
    )?;
    let collator = BatchCollator::new(Vec::new(), extractor);

    let samples = vec![
        data_pipeline::Sample::from_single("h", Value::scalar_f64(480.0))
            .with_field("w", Value::scalar_f64(640.0)),
        data_pipeline::Sample::from_single("h", Value::scalar_f64(600.0))
            .with_field("w", Value::scalar_f64(800.0)),
    ];

    let out = collator.collate(samples)?;
    let record = out.feed("im_shape")?;
    assert_eq!(record.array.shape()?, &[2, 3]);
    let Value::F32(a) = &record.array else {
        panic!("expected F32");
    };
    assert_eq!(a[[0, 1]], 640.0);
    assert_eq!(a[[1, 2]], 3.0);
    Ok(())
}
