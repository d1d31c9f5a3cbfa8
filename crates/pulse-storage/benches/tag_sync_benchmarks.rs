//! Benchmarks for the tag sync planner.
//!
//! `plan_sync` runs on every moment insert and edit, so its cost for
//! realistic tag sets (a handful of names) and for oversized ones is
//! tracked here.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pulse_storage::plan_sync;

/// Tag names `tag-{offset}..tag-{offset + n}`, mixed case so normalization runs.
fn generate_tags(n: usize, offset: usize) -> Vec<String> {
    (offset..offset + n)
        .map(|i| {
            if i % 2 == 0 {
                format!("Tag-{}", i)
            } else {
                format!(" tag-{} ", i)
            }
        })
        .collect()
}

fn persisted(tags: &[String]) -> Vec<String> {
    tags.iter().map(|t| t.trim().to_lowercase()).collect()
}

fn bench_plan_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_sync");
    group.sample_size(200);
    group.measurement_time(Duration::from_secs(5));

    // Typical edit: five tags, two swapped.
    let desired_small = generate_tags(5, 2);
    let persisted_small = persisted(&generate_tags(5, 0));
    group.bench_function("small_overlap", |b| {
        b.iter(|| plan_sync(black_box(&desired_small), black_box(&persisted_small)))
    });

    // Re-save without changes.
    let unchanged = persisted(&desired_small);
    group.bench_function("small_noop", |b| {
        b.iter(|| plan_sync(black_box(&desired_small), black_box(&unchanged)))
    });

    let desired_large = generate_tags(500, 250);
    let persisted_large = persisted(&generate_tags(500, 0));
    group.bench_function("large_overlap", |b| {
        b.iter(|| plan_sync(black_box(&desired_large), black_box(&persisted_large)))
    });

    group.bench_function("large_clear", |b| {
        b.iter(|| plan_sync(black_box(Vec::<String>::new()), black_box(&persisted_large)))
    });

    group.finish();
}

criterion_group!(benches, bench_plan_sync);
criterion_main!(benches);
