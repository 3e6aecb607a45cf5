use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ctchain_core::FaultFlags;
use ctchain_permute::Permutation;

fn bench_apply(c: &mut Criterion) {
    let perm = Permutation::new(0x1234_5678, 0, 100_003).unwrap();

    c.bench_function("feistel_apply_100003", |b| {
        b.iter(|| {
            let mut faults = FaultFlags::new();
            black_box(perm.apply(black_box(42_424), &mut faults))
        })
    });
}

criterion_group!(benches, bench_apply);
criterion_main!(benches);
