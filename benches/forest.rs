use std::hint::black_box;

use astrobase::ml::forest::{ForestParams, fit_forest};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ndarray::Array2;

const SAMPLE_COUNT: usize = 2_000;
const FEATURE_COUNT: usize = 21;

fn dataset() -> (Array2<f64>, Vec<i64>) {
    let labels: Vec<i64> = (0..SAMPLE_COUNT).map(|i| (i % 3 == 0) as i64).collect();
    let features = Array2::from_shape_fn((SAMPLE_COUNT, FEATURE_COUNT), |(row, col)| {
        let signal = labels[row] as f64 * (col % 4) as f64;
        let noise = ((row * 31 + col * 17) % 97) as f64 / 97.0;
        if (row + col) % 50 == 0 {
            f64::NAN
        } else {
            signal + noise
        }
    });
    (features, labels)
}

fn params(n_estimators: usize) -> ForestParams {
    ForestParams {
        n_estimators,
        max_depth: Some(12),
        ..ForestParams::default()
    }
}

fn bench_fit(c: &mut Criterion) {
    let (features, labels) = dataset();
    let mut group = c.benchmark_group("fit_forest");
    group.sample_size(10);
    for n_estimators in [10, 50] {
        group.bench_with_input(
            BenchmarkId::from_parameter(n_estimators),
            &n_estimators,
            |b, &n_estimators| {
                b.iter(|| {
                    fit_forest(features.view(), black_box(&labels), &params(n_estimators), 0)
                        .expect("fit")
                });
            },
        );
    }
    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let (features, labels) = dataset();
    let model = fit_forest(features.view(), &labels, &params(50), 0).expect("fit");
    c.bench_function("predict_proba", |b| {
        b.iter(|| model.predict_proba(black_box(features.view()), 0).expect("predict"));
    });
}

criterion_group!(benches, bench_fit, bench_predict);
criterion_main!(benches);
