//! Criterion benchmarks for approximate matching.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kpcn_core::{approx_match, match_cost, ConfusionMatrix};

/// Points on a jittered line, `[x0, y0, z0, x1, ...]`.
fn make_points(n: usize, offset: f32) -> Vec<f32> {
    (0..n)
        .flat_map(|i| {
            let t = i as f32 / n as f32;
            [t, (t * 17.0).sin() * 0.1 + offset, (t * 23.0).cos() * 0.1]
        })
        .collect()
}

fn bench_approx_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("approx_match");

    for n in [64usize, 256, 1024] {
        let p = make_points(n, 0.0);
        let q = make_points(n, 0.05);
        group.throughput(Throughput::Elements((n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(approx_match(n, n, black_box(&p), black_box(&q))))
        });
    }

    group.finish();
}

fn bench_match_cost(c: &mut Criterion) {
    let n = 256;
    let p = make_points(n, 0.0);
    let q = make_points(n, 0.05);
    let plan = approx_match(n, n, &p, &q).unwrap();

    c.bench_function("match_cost_256", |b| {
        b.iter(|| black_box(match_cost(n, n, black_box(&p), black_box(&q), black_box(&plan))))
    });
}

fn bench_confusion(c: &mut Criterion) {
    let predicted: Vec<usize> = (0..100_000).map(|i| (i * 7) % 13).collect();
    let targets: Vec<usize> = (0..100_000).map(|i| (i * 5) % 13).collect();

    c.bench_function("confusion_from_labels_100k", |b| {
        b.iter(|| black_box(ConfusionMatrix::from_labels(13, black_box(&predicted), black_box(&targets))))
    });
}

criterion_group!(benches, bench_approx_match, bench_match_cost, bench_confusion);
criterion_main!(benches);
