//! End-to-end pipeline tests: bytes in through `receive_data`, typed
//! messages out through registered sinks, 75-byte replies out through the
//! serial link.

use cogbus_events::{BacktickKind, MessageTag, PipelineEvent, SyncSource};
use cogterm_core::{
    BacktickWindowSink, DebuggerWindowSink, Destination, OwnedMessage, Processor, SerialLink,
    TerminalSink,
};
use cogterm_config::TermConfig;
use cogterm_framer::{DEBUGGER_FRAME_LEN, SNAPSHOT_LEN, build_snapshot};
use crossbeam_channel::{Receiver, unbounded};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Captures everything the pipeline writes back to the target.
#[derive(Default)]
struct MockSerial {
    writes: Mutex<Vec<Vec<u8>>>,
}

impl SerialLink for MockSerial {
    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.writes.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

struct Rig {
    processor: Processor,
    serial: Arc<MockSerial>,
    terminal: Receiver<OwnedMessage>,
    plot: Receiver<OwnedMessage>,
    debugger: Vec<Receiver<OwnedMessage>>,
}

fn rig() -> Rig {
    let config = TermConfig::default();
    let serial = Arc::new(MockSerial::default());
    let processor = Processor::new(&config, Arc::clone(&serial) as Arc<dyn SerialLink>)
        .expect("processor");

    let (term_tx, terminal) = unbounded();
    let terminal_sink: Arc<dyn Destination> = Arc::new(TerminalSink::new(term_tx));

    let (plot_tx, plot) = unbounded();
    let window_channels = Mutex::new(Some(plot_tx));
    let window_creator = move |kind: BacktickKind| -> Arc<dyn Destination> {
        let tx = match kind {
            BacktickKind::Plot => window_channels
                .lock()
                .unwrap()
                .take()
                .expect("plot window created once"),
            _ => unbounded().0,
        };
        Arc::new(BacktickWindowSink::new(kind, tx))
    };

    let mut debugger = Vec::new();
    let debugger_channels: Mutex<Vec<_>> = Mutex::new(Vec::new());
    for _ in 0..8 {
        let (tx, rx) = unbounded();
        debugger_channels.lock().unwrap().push(tx);
        debugger.push(rx);
    }
    let debugger_sink = move |core: u8| -> Arc<dyn Destination> {
        let tx = debugger_channels.lock().unwrap()[core as usize].clone();
        Arc::new(DebuggerWindowSink::new(core, tx))
    };

    processor.apply_standard_routing(
        None,
        &window_creator,
        terminal_sink,
        Some(&debugger_sink),
        None,
    );
    processor.start().expect("start");

    Rig {
        processor,
        serial,
        terminal,
        plot,
        debugger,
    }
}

fn recv(rx: &Receiver<OwnedMessage>) -> OwnedMessage {
    rx.recv_timeout(Duration::from_secs(2)).expect("message")
}

fn wait_event(
    events: &Receiver<PipelineEvent>,
    mut pred: impl FnMut(&PipelineEvent) -> bool,
) -> PipelineEvent {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline
            .checked_duration_since(std::time::Instant::now())
            .expect("event before timeout");
        let ev = events.recv_timeout(remaining).expect("event stream");
        if pred(&ev) {
            return ev;
        }
    }
}

#[test]
fn text_backtick_and_cog_messages_reach_their_sinks() {
    let r = rig();

    r.processor.receive_data(b"Hello\n");
    let msg = recv(&r.terminal);
    assert_eq!(msg.tag, MessageTag::TerminalOutput);
    assert_eq!(msg.payload, b"Hello\n");
    assert_eq!(msg.flags, 0);

    r.processor.receive_data(b"`PLOT set 100 200\n");
    let msg = recv(&r.plot);
    assert_eq!(msg.tag, MessageTag::BacktickPlot);
    assert_eq!(msg.payload, b"`PLOT set 100 200\n");

    // Cog messages go to the terminal when no cog router is installed.
    r.processor.receive_data(b"Cog3 ready\n");
    let msg = recv(&r.terminal);
    assert_eq!(msg.tag, MessageTag::cog_message(3));
    assert_eq!(msg.payload.len(), 11);

    r.processor.stop();
}

#[test]
fn status_block_routes_to_its_core_window() {
    let r = rig();
    let block = build_snapshot(6);
    r.processor.receive_data(&block);
    r.processor.receive_data(b"\r\n");

    let msg = recv(&r.debugger[6]);
    assert_eq!(msg.tag, MessageTag::debugger(6));
    assert_eq!(msg.payload, block.to_vec());

    // The 80-byte block is short of a full frame: no reply goes out.
    std::thread::sleep(Duration::from_millis(50));
    assert!(r.serial.writes.lock().unwrap().is_empty());

    r.processor.stop();
}

#[test]
fn full_debugger_frame_triggers_75_byte_reply() {
    let r = rig();
    let events = r.processor.events();

    let mut frame = build_snapshot(1).to_vec();
    frame.extend(std::iter::repeat_n(0xAA, DEBUGGER_FRAME_LEN - SNAPSHOT_LEN));
    r.processor.receive_data(&frame);
    r.processor.receive_data(b"ok\n");

    wait_event(&events, |e| {
        matches!(e, PipelineEvent::DebuggerPacketReceived { core: 1 })
    });

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(reply) = r.serial.writes.lock().unwrap().first() {
            assert_eq!(reply.len(), 75);
            // Command word defaults to keep-running.
            assert_eq!(&reply[71..75], &0x8000_0000u32.to_le_bytes());
            break;
        }
        assert!(std::time::Instant::now() < deadline, "no reply written");
        std::thread::sleep(Duration::from_millis(5));
    }

    let msg = recv(&r.debugger[1]);
    assert_eq!(msg.payload.len(), DEBUGGER_FRAME_LEN);

    r.processor.stop();
}

#[test]
fn system_init_line_emits_reboot_and_rotation() {
    let r = rig();
    let events = r.processor.events();

    r.processor.receive_data(b"Cog0  INIT $0000_0000 $0000_0000 load\n");

    wait_event(&events, |e| matches!(e, PipelineEvent::P2SystemReboot));
    wait_event(&events, |e| matches!(e, PipelineEvent::RotateLog { .. }));

    // The INIT banner still reaches the terminal.
    let msg = recv(&r.terminal);
    assert_eq!(msg.tag, MessageTag::P2SystemInit);

    r.processor.stop();
}

#[test]
fn dtr_reset_sequences_sync_and_rotation() {
    let r = rig();
    let events = r.processor.events();

    r.processor.on_dtr_reset();

    let ev = wait_event(&events, |e| matches!(e, PipelineEvent::ResetDetected(_)));
    let PipelineEvent::ResetDetected(marker) = ev else {
        unreachable!()
    };
    assert_eq!(marker.sequence, 0);
    wait_event(&events, |e| matches!(e, PipelineEvent::RotateLog { .. }));

    let status = r.processor.sync_status();
    assert!(status.synchronized);
    assert_eq!(status.source, Some(SyncSource::Dtr));

    let stats = r.processor.stats();
    assert_eq!(stats.reset.total, 1);
    assert_eq!(stats.reset.last_kind.as_deref(), Some("DTR"));

    r.processor.stop();
}

#[test]
fn garbage_surfaces_as_degraded_terminal_output() {
    let r = rig();

    let mut input: Vec<u8> = (0..17u8).map(|i| 0x80 + i).collect();
    input.extend(b"Cog0 hello\n");
    r.processor.receive_data(&input);

    let first = recv(&r.terminal);
    assert_eq!(first.tag, MessageTag::TerminalOutput);
    assert_eq!(first.flags, cogbus_events::flags::DEGRADED);
    assert_eq!(first.payload.len(), 17);

    let second = recv(&r.terminal);
    assert_eq!(second.tag, MessageTag::cog_message(0));
    assert_eq!(second.payload, b"Cog0 hello\n");

    r.processor.stop();
}

#[test]
fn stats_count_the_traffic() {
    let r = rig();

    r.processor.receive_data(b"Hello\n");
    r.processor.receive_data(b"`TERM 0\n");
    let _ = recv(&r.terminal);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let stats = r.processor.stats();
        if stats.performance.messages_published >= 2 && stats.router.routed >= 2 {
            assert_eq!(stats.performance.bytes_received, 14);
            assert!(stats.performance.text_lines >= 2);
            assert_eq!(stats.performance.ring_dropped_bytes, 0);
            assert_eq!(stats.router.in_flight, 0);
            break;
        }
        assert!(std::time::Instant::now() < deadline, "stats never settled");
        std::thread::sleep(Duration::from_millis(5));
    }

    r.processor.stop();
}

#[test]
fn stop_is_clean_and_repeatable() {
    let r = rig();
    r.processor.receive_data(b"Hello\n");
    let _ = recv(&r.terminal);
    r.processor.stop();
    // A second stop finds nothing to join and does not hang.
    r.processor.stop();
}
