//! Benchmarks for stage and pipeline throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use serde_json::json;
use std::sync::Arc;

use redflow::kernels::Calibration;
use redflow::pipeline::{MaskSetting, PipelineConfig, PipelineInputs, ReductionPipeline};
use redflow::stages::{dark_subtraction, DarkSubtractionConfig, RAW_IMAGE_FIELD};
use redflow::streams::tee;
use redflow::testing::{seed_broker, RunBuilder};

const SHAPE: (usize, usize) = (256, 256);

fn frames(n: usize, level: f64) -> Vec<Array2<f64>> {
    vec![Array2::from_elem(SHAPE, level); n]
}

fn stage_benchmark(c: &mut Criterion) {
    let light = RunBuilder::new().image_events(RAW_IMAGE_FIELD, frames(20, 5.0)).build();
    let dark = RunBuilder::new().image_events(RAW_IMAGE_FIELD, frames(1, 1.0)).build();

    c.bench_function("dark_subtraction_20_frames", |b| {
        b.iter(|| {
            let stage = dark_subtraction(light.stream(), dark.stream(), DarkSubtractionConfig::default());
            black_box(stage.map(Iterator::count))
        });
    });

    c.bench_function("tee_3_branches", |b| {
        b.iter(|| {
            let branches = tee(light.stream(), 3);
            black_box(branches.into_iter().map(Iterator::count).sum::<usize>())
        });
    });
}

fn pipeline_benchmark(c: &mut Criterion) {
    let cal = Calibration::new(0.2, 0.0128, 0.0128).with_wavelength(1.8e-11);
    let raw = RunBuilder::new()
        .metadata("calibration_md", cal.to_json())
        .metadata("dark_collection_uid", json!("dc"))
        .image_events(RAW_IMAGE_FIELD, frames(5, 5.0))
        .build();
    let dark = RunBuilder::new()
        .metadata("dark_collection_uid", json!("dc"))
        .metadata("is_dark", json!(true))
        .image_events(RAW_IMAGE_FIELD, frames(1, 1.0))
        .build();
    let broker = match seed_broker([&raw, &dark]) {
        Ok(broker) => Arc::new(broker),
        Err(e) => panic!("seeding benchmark broker: {e}"),
    };
    let config = PipelineConfig::default().with_mask_setting(MaskSetting::None);

    c.bench_function("reduce_5_frames", |b| {
        b.iter(|| {
            let mut pipeline = ReductionPipeline::new(config.clone(), broker.clone()).ok();
            let docs = pipeline
                .as_mut()
                .and_then(|p| p.reduce(raw.stream(), PipelineInputs::default()).ok())
                .map(Iterator::count);
            black_box(docs)
        });
    });
}

criterion_group!(benches, stage_benchmark, pipeline_benchmark);
criterion_main!(benches);
