use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use treedigest::TreeDigest;

fn bench_add(c: &mut Criterion) {
    let mut rng = SmallRng::seed_from_u64(1);
    let values: Vec<f64> = (0..10_000).map(|_| rng.gen()).collect();

    c.bench_function("add_10k_uniform", |b| {
        b.iter(|| {
            let mut digest = TreeDigest::with_seed(100.0, 2).unwrap();
            for &value in &values {
                digest.add(value, 1).unwrap();
            }
            digest
        })
    });

    c.bench_function("add_10k_sorted", |b| {
        b.iter(|| {
            let mut digest = TreeDigest::with_seed(100.0, 3).unwrap();
            for i in 0..10_000 {
                digest.add(f64::from(i), 1).unwrap();
            }
            digest
        })
    });
}

fn bench_queries(c: &mut Criterion) {
    let mut rng = SmallRng::seed_from_u64(5);
    let mut digest = TreeDigest::with_seed(100.0, 7).unwrap();
    for _ in 0..100_000 {
        digest.add(rng.gen(), 1).unwrap();
    }

    c.bench_function("quantile_p99", |b| {
        b.iter(|| digest.quantile(black_box(0.99)).unwrap())
    });
    c.bench_function("cdf_mid", |b| b.iter(|| digest.cdf(black_box(0.5))));
}

criterion_group!(benches, bench_add, bench_queries);
criterion_main!(benches);
