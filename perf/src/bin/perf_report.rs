//! Ad-hoc latency report for the ingestion hot paths. Unlike the
//! criterion benches this prints a compact percentile table, suited for
//! quick before/after comparisons.
//!
//! ```bash
//! cargo run -p cogterm-perf --release --bin perf_report
//! ```

use cogbus_events::MessageTag;
use cogbus_pool::MessagePool;
use cogbus_ring::{RingConfig, byte_ring};
use cogterm_framer::{Extract, Framer, SyncCell};
use cogterm_perf::{
    generate_stream_corpus, measure_batched, mono_now_ns, print_result_row, print_table_header,
    section_header,
};
use std::sync::Arc;

const BATCHES: usize = 200;
const BATCH_SIZE: usize = 1_000;
const WARMUP: usize = 10;

fn main() {
    let started = mono_now_ns();
    let mut results = Vec::new();

    // Ring hot path.
    {
        let (mut tx, mut rx) = byte_ring(RingConfig::new(1 << 20)).expect("ring");
        let chunk = [0x41u8; 64];
        results.push(measure_batched(
            "ring write+consume 64B",
            BATCHES,
            BATCH_SIZE,
            WARMUP,
            || {
                tx.write(&chunk);
                rx.consume(64);
            },
        ));
    }

    // Pool hot path.
    {
        let pool = MessagePool::standard().expect("pool");
        let payload = [0x20u8; 64];
        results.push(measure_batched(
            "pool acquire+fill+release",
            BATCHES,
            BATCH_SIZE,
            WARMUP,
            || {
                let mut w = pool.acquire(payload.len()).expect("slot");
                w.write_tag(MessageTag::TerminalOutput);
                w.write_payload(&payload);
                let id = w.id();
                pool.release(id);
            },
        ));
    }

    // Framer over a mixed corpus.
    {
        let corpus = generate_stream_corpus(1024);
        let (mut tx, mut rx) = byte_ring(RingConfig::new(1 << 20)).expect("ring");
        let mut framer = Framer::new(Arc::new(SyncCell::new()));
        let mut i = 0usize;
        results.push(measure_batched(
            "framer classify mixed",
            BATCHES,
            BATCH_SIZE,
            WARMUP,
            || {
                tx.write(&corpus[i % corpus.len()]);
                i += 1;
                while let Some(extract) = framer.poll(&mut rx) {
                    if let Extract::Frame(f) = extract {
                        rx.consume(f.skip + f.length);
                    }
                }
            },
        ));
    }

    section_header("cogterm ingestion hot paths");
    print_table_header();
    for r in &results {
        print_result_row(r);
    }
    let elapsed_ms = (mono_now_ns() - started) / 1_000_000;
    println!("\n  total wall time: {elapsed_ms} ms\n");
}
