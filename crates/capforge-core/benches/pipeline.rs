//! Benchmarks for the tagger ensemble hot paths.
//!
//! Run with: cargo bench -p capforge-core

use capforge_core::tagger::{ensemble, preprocess};
use capforge_core::Tag;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::DynamicImage;

/// Synthetic session over a WD14-sized vocabulary.
fn session(vocab: usize, offset: usize) -> Vec<Tag> {
    (0..vocab)
        .map(|i| {
            let score = ((i + offset) % 997) as f32 / 997.0;
            Tag::new(format!("tag_{}", i + offset), score)
        })
        .collect()
}

fn benchmark_combine_single(c: &mut Criterion) {
    let sessions = vec![session(9083, 0)];
    let blocked = vec!["tag_1".to_string(), "tag_2".to_string()];

    c.bench_function("ensemble_combine_1_model", |b| {
        b.iter(|| ensemble::combine(black_box(sessions.clone()), &blocked, 0.5))
    });
}

fn benchmark_combine_stacked(c: &mut Criterion) {
    let sessions = vec![session(9083, 0), session(9083, 5), session(9083, 11)];
    let blocked = vec!["tag_1".to_string(), "tag_2".to_string()];

    c.bench_function("ensemble_combine_3_models", |b| {
        b.iter(|| ensemble::combine(black_box(sessions.clone()), &blocked, 0.5))
    });
}

fn benchmark_format(c: &mut Criterion) {
    let tags = ensemble::threshold_and_sort(session(9083, 0), 0.9);

    c.bench_function("format_tag_line", |b| {
        b.iter(|| ensemble::format_tag_line(black_box(&tags)))
    });
}

fn benchmark_preprocess(c: &mut Criterion) {
    let img = DynamicImage::new_rgba8(1024, 768);

    c.bench_function("wd14_preprocess_448", |b| {
        b.iter(|| preprocess::preprocess(black_box(&img), 448))
    });
}

criterion_group!(
    benches,
    benchmark_combine_single,
    benchmark_combine_stacked,
    benchmark_format,
    benchmark_preprocess,
);
criterion_main!(benches);
