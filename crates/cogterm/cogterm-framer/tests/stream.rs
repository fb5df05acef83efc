//! Stream-level classification tests: literal inputs through a real ring,
//! mirroring how the worker drives the framer.

use cogbus_events::MessageTag;
use cogbus_ring::{RingConfig, byte_ring};
use cogterm_framer::{DEBUGGER_FRAME_LEN, Extract, Framer, SNAPSHOT_LEN, SyncCell, build_snapshot};
use std::sync::Arc;

/// One observed message: tag, payload bytes, degraded marker.
type Seen = (MessageTag, Vec<u8>, bool);

fn drain(framer: &mut Framer, rx: &mut cogbus_ring::RingConsumer, out: &mut Vec<Seen>) {
    while let Some(extract) = framer.poll(rx) {
        match extract {
            Extract::Frame(f) => {
                let payload = rx.peek(f.skip, f.length).expect("frame within ring").to_vec();
                rx.consume(f.skip + f.length);
                out.push((f.tag, payload, false));
            }
            Extract::Garbage(bytes) => out.push((MessageTag::TerminalOutput, bytes, true)),
        }
    }
}

/// Feeds `input` in chunks of `chunk` bytes and returns every message the
/// framer emits.
fn run_stream(input: &[u8], chunk: usize) -> Vec<Seen> {
    let (mut tx, mut rx) = byte_ring(RingConfig::new(1 << 16)).expect("ring");
    let mut framer = Framer::new(Arc::new(SyncCell::new()));
    let mut out = Vec::new();
    for part in input.chunks(chunk.max(1)) {
        tx.write(part);
        drain(&mut framer, &mut rx, &mut out);
    }
    drain(&mut framer, &mut rx, &mut out);
    out
}

#[test]
fn plain_text_line() {
    let seen = run_stream(b"Hello\n", 6);
    assert_eq!(seen, vec![(MessageTag::TerminalOutput, b"Hello\n".to_vec(), false)]);
}

#[test]
fn backtick_line_is_classified_by_leading_word() {
    let seen = run_stream(b"`PLOT set 100 200\n", 18);
    assert_eq!(
        seen,
        vec![(MessageTag::BacktickPlot, b"`PLOT set 100 200\n".to_vec(), false)]
    );
}

#[test]
fn cog_prefixed_line_embeds_core_index() {
    let seen = run_stream(b"Cog3 ready\n", 11);
    assert_eq!(seen.len(), 1);
    let (tag, payload, degraded) = &seen[0];
    assert_eq!(*tag, MessageTag::cog_message(3));
    assert_eq!(payload.len(), 11);
    assert!(!degraded);
}

#[test]
fn system_init_line_gets_its_own_tag() {
    let seen = run_stream(b"Cog0  INIT $0000_0000 $0000_0000 load\n", 64);
    assert_eq!(seen[0].0, MessageTag::P2SystemInit);
}

#[test]
fn protocol_frame_extracts_payload() {
    let mut input = vec![0xDB, 0x05, 0x08, 0x00];
    input.extend([1, 2, 3, 4, 5, 6, 7, 8]);
    let seen = run_stream(&input, input.len());
    assert_eq!(
        seen,
        vec![(MessageTag::DbPacket, vec![1, 2, 3, 4, 5, 6, 7, 8], false)]
    );
}

#[test]
fn absurd_frame_length_recovers_one_byte_at_a_time() {
    // A valid frame, then a 0xDB header claiming 0x8000 payload bytes,
    // then ordinary text. The bogus header must be shed as noise.
    let mut input = vec![0xDB, 0x05, 0x08, 0x00];
    input.extend([1, 2, 3, 4, 5, 6, 7, 8]);
    input.extend([0xDB, 0x05, 0x00, 0x80]);
    let mut line = vec![b'A'; 99];
    line.push(b'\n');
    input.extend(&line);

    let seen = run_stream(&input, input.len());
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], (MessageTag::DbPacket, vec![1, 2, 3, 4, 5, 6, 7, 8], false));
    // The four bogus header bytes come back as one degraded chunk.
    assert_eq!(seen[1], (MessageTag::TerminalOutput, vec![0xDB, 0x05, 0x00, 0x80], true));
    assert_eq!(seen[2], (MessageTag::TerminalOutput, line, false));
}

#[test]
fn mid_stream_attach_recovers_after_noise() {
    // Noise bytes outside every recognizer: non-text, not 0xDB, above the
    // core-index range.
    let noise: Vec<u8> = (0..17).map(|i| 0x80 + i as u8).collect();
    let mut input = noise.clone();
    input.extend(b"Cog0 hello\n");

    for chunk in [input.len(), 1, 5] {
        let seen = run_stream(&input, chunk);
        assert_eq!(seen.len(), 2, "chunk size {chunk}");
        assert_eq!(seen[0], (MessageTag::TerminalOutput, noise.clone(), true));
        assert_eq!(
            seen[1],
            (MessageTag::cog_message(0), b"Cog0 hello\n".to_vec(), false)
        );
        let total: usize = seen.iter().map(|(_, p, _)| p.len()).sum();
        assert_eq!(total, 17 + 11);
    }
}

#[test]
fn long_noise_flushes_in_bounded_chunks() {
    let mut input: Vec<u8> = (0..300).map(|i| 0x80 + (i % 0x40) as u8).collect();
    input.extend(b"Cog5 up\n");

    let seen = run_stream(&input, input.len());
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].1.len(), 256);
    assert!(seen[0].2);
    assert_eq!(seen[1].1.len(), 44);
    assert!(seen[1].2);
    assert_eq!(seen[2].0, MessageTag::cog_message(5));
}

#[test]
fn status_block_alone_emits_at_exactly_80_bytes() {
    let block = build_snapshot(2);
    let seen = run_stream(&block, block.len());
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, MessageTag::debugger(2));
    assert_eq!(seen[0].1, block.to_vec());
}

#[test]
fn status_block_followed_by_text_splits_at_80() {
    let mut input = build_snapshot(7).to_vec();
    input.extend(b"OK\n");
    let seen = run_stream(&input, input.len());
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, MessageTag::debugger(7));
    assert_eq!(seen[0].1.len(), SNAPSHOT_LEN);
    assert_eq!(seen[1], (MessageTag::TerminalOutput, b"OK\n".to_vec(), false));
}

#[test]
fn back_to_back_status_blocks_split_on_core_index_boundary() {
    let mut input = Vec::new();
    for core in 0..4u32 {
        input.extend(build_snapshot(core));
    }
    let seen = run_stream(&input, input.len());
    assert_eq!(seen.len(), 4);
    for (core, (tag, payload, _)) in seen.iter().enumerate() {
        assert_eq!(*tag, MessageTag::debugger(core as u8));
        assert_eq!(payload.len(), SNAPSHOT_LEN);
    }
}

#[test]
fn binary_continuation_extends_to_full_debugger_frame() {
    // Byte 80 is not a plausible message start, so the block is the full
    // 416-byte per-step frame; the text after byte 416 delimits it.
    let mut frame = build_snapshot(1).to_vec();
    frame.extend(std::iter::repeat_n(0xAA, DEBUGGER_FRAME_LEN - SNAPSHOT_LEN));
    let mut input = frame.clone();
    input.extend(b"Done\n");

    let seen = run_stream(&input, input.len());
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, MessageTag::debugger(1));
    assert_eq!(seen[0].1, frame);
    assert_eq!(seen[1].0, MessageTag::TerminalOutput);
}

#[test]
fn emitted_sequence_is_chunking_invariant() {
    // A realistic interleaving: text, backtick command, protocol frame,
    // core message, status block delimited by text, more text.
    let mut input = Vec::new();
    input.extend(b"P2 terminal up\r\n");
    input.extend(b"`SCOPE trig 3 100\n");
    input.extend([0xDB, 0x11, 0x06, 0x00]);
    input.extend([0x00, 0xFF, 0x10, 0x20, 0x30, 0x40]);
    input.extend(b"Cog6 waiting\n");
    input.extend(build_snapshot(4));
    input.extend(b"tail line\n");

    let reference = run_stream(&input, input.len());
    assert_eq!(reference.len(), 6);
    assert_eq!(reference[0].0, MessageTag::TerminalOutput);
    assert_eq!(reference[1].0, MessageTag::BacktickScope);
    assert_eq!(reference[2].0, MessageTag::DbPacket);
    assert_eq!(reference[3].0, MessageTag::cog_message(6));
    assert_eq!(reference[4].0, MessageTag::debugger(4));
    assert_eq!(reference[5].0, MessageTag::TerminalOutput);

    for chunk in [1, 2, 3, 5, 7, 13, 64, 256] {
        assert_eq!(run_stream(&input, chunk), reference, "chunk size {chunk}");
    }
}

#[test]
fn sync_flips_on_first_recognized_message() {
    let (mut tx, mut rx) = byte_ring(RingConfig::new(1 << 16)).expect("ring");
    let sync = Arc::new(SyncCell::new());
    let mut framer = Framer::new(Arc::clone(&sync));

    assert!(!framer.synchronized());
    // Pure noise does not synchronize.
    tx.write(&[0x90, 0x91, 0x92]);
    let mut out = Vec::new();
    drain(&mut framer, &mut rx, &mut out);
    assert!(!framer.synchronized());
    assert!(framer.take_sync_change().is_none());

    tx.write(b"Cog1 boot\n");
    drain(&mut framer, &mut rx, &mut out);
    assert!(framer.synchronized());
    let status = framer.take_sync_change().expect("sync edge");
    assert!(status.synchronized);
    assert_eq!(status.source, Some(cogbus_events::SyncSource::TextLine));
    // Edge is reported once.
    assert!(framer.take_sync_change().is_none());
}
