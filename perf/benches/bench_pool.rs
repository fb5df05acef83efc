use cogbus_events::MessageTag;
use cogbus_pool::MessagePool;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

fn bench_acquire_release(c: &mut Criterion) {
    let pool = MessagePool::standard().expect("pool");
    let payload = [0x20u8; 64];

    let mut group = c.benchmark_group("pool");
    group.throughput(Throughput::Elements(1));

    group.bench_function("acquire+fill+release small", |b| {
        b.iter(|| {
            let mut w = pool.acquire(payload.len()).expect("slot");
            w.write_tag(MessageTag::TerminalOutput);
            w.write_payload(black_box(&payload));
            let id = w.id();
            pool.release(id);
        });
    });

    group.bench_function("acquire+release large", |b| {
        b.iter(|| {
            let w = pool.acquire(4096).expect("slot");
            let id = w.id();
            pool.release(id);
        });
    });

    group.bench_function("message_type", |b| {
        let mut w = pool.acquire(16).expect("slot");
        w.write_tag(MessageTag::BacktickPlot);
        let id = w.id();
        b.iter(|| {
            black_box(pool.message_type(black_box(id)));
        });
        pool.release(id);
    });

    group.bench_function("increment+release fan-out of 4", |b| {
        b.iter(|| {
            let w = pool.acquire(16).expect("slot");
            let id = w.id();
            pool.increment(id, 3);
            for _ in 0..4 {
                pool.release(id);
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_acquire_release);
criterion_main!(benches);
