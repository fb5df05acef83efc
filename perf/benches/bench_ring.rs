use cogbus_ring::{RingConfig, byte_ring};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

fn bench_write_consume(c: &mut Criterion) {
    let (mut tx, mut rx) = byte_ring(RingConfig::new(1 << 20)).expect("ring");
    let chunk = [0x41u8; 64];

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Bytes(64));

    group.bench_function("write+consume 64B", |b| {
        b.iter(|| {
            tx.write(black_box(&chunk));
            rx.consume(64);
        });
    });

    group.bench_function("peek 64B", |b| {
        tx.write(&chunk);
        b.iter(|| {
            black_box(rx.peek(0, 64));
        });
        rx.consume(64);
    });

    group.finish();
}

fn bench_wrapped_write(c: &mut Criterion) {
    // Small ring so every write straddles the wrap point regularly.
    let (mut tx, mut rx) = byte_ring(RingConfig::new(1 << 10)).expect("ring");
    let chunk = [0x42u8; 300];

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Bytes(300));
    group.bench_function("write+consume 300B wrapping", |b| {
        b.iter(|| {
            tx.write(black_box(&chunk));
            rx.consume(300);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_write_consume, bench_wrapped_write);
criterion_main!(benches);
