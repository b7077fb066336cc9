use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use forwarder_stats::{Datapoint, DatapointRing};

fn push_distinct_seconds(c: &mut Criterion) {
    c.bench_function("ring_push_advance", |b| {
        let mut ring = DatapointRing::new(60);
        let mut t = 0i64;
        b.iter(|| {
            t += 1;
            black_box(ring.push(Datapoint::new(t, 10, 1024)));
        });
    });
}

fn push_same_second(c: &mut Criterion) {
    c.bench_function("ring_push_coalesce", |b| {
        let mut ring = DatapointRing::new(60);
        ring.push(Datapoint::new(1, 0, 0));
        b.iter(|| black_box(ring.push(Datapoint::new(1, 10, 1024))));
    });
}

fn read_full_ring(c: &mut Criterion) {
    c.bench_function("ring_read_all_wrapped", |b| {
        b.iter_batched(
            || {
                let mut ring = DatapointRing::new(60);
                for t in 0..90 {
                    ring.push(Datapoint::new(t, t as u64, 0));
                }
                ring
            },
            |ring| black_box(ring.read_all().map(|dp| dp.records).sum::<u64>()),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, push_distinct_seconds, push_same_second, read_full_ring);
criterion_main!(benches);
