//! The framing worker thread.
//!
//! Drives the framer off the ring, copies each extracted message into a
//! pool slot and publishes the slot id to the router over the bounded
//! signal. The worker never blocks on the router: when the signal is full
//! it spins briefly, then drops the message and releases the slot.

use crate::ControlMsg;
use crate::stats::PipelineCounters;
use cogbus_events::{MessageTag, RoutingErrorKind, flags};
use cogbus_pool::{MessagePool, PoolId};
use cogbus_ring::RingConsumer;
use cogterm_framer::{Extract, Framer};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[cfg(feature = "perf")]
use cogterm_perf_recorder::{PerfRecorder, PerfStage};

/// How long to spin on a full signal before dropping the message.
const SIGNAL_SPIN: Duration = Duration::from_micros(200);

/// Idle wait between wake checks; bounds shutdown latency.
const IDLE_WAIT: Duration = Duration::from_millis(10);

pub struct Worker {
    ring: RingConsumer,
    framer: Framer,
    pool: Arc<MessagePool>,
    signal: Sender<PoolId>,
    control: Sender<ControlMsg>,
    in_flight: Arc<AtomicU64>,
    counters: Arc<PipelineCounters>,
    shutdown: Arc<AtomicBool>,
    wake: Receiver<()>,
    #[cfg(feature = "perf")]
    perf: PerfRecorder,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ring: RingConsumer,
        framer: Framer,
        pool: Arc<MessagePool>,
        signal: Sender<PoolId>,
        control: Sender<ControlMsg>,
        in_flight: Arc<AtomicU64>,
        counters: Arc<PipelineCounters>,
        shutdown: Arc<AtomicBool>,
        wake: Receiver<()>,
    ) -> Self {
        Self {
            ring,
            framer,
            pool,
            signal,
            control,
            in_flight,
            counters,
            shutdown,
            wake,
            #[cfg(feature = "perf")]
            perf: PerfRecorder::new(),
        }
    }

    /// Thread body. Returns after the shutdown flag is set and one final
    /// drain of the ring has run.
    pub fn run(mut self) {
        debug!("worker starting");
        loop {
            self.pump();
            if self.shutdown.load(Ordering::Acquire) {
                // One last pass for bytes that arrived with the flag.
                self.pump();
                break;
            }
            // Idle until the receive path wakes us or the timeout gives
            // the shutdown flag another look.
            let _ = self.wake.recv_timeout(IDLE_WAIT);
        }
        debug!("worker exiting");
    }

    /// Extracts and publishes every message currently parseable. Public
    /// so tests can drive the worker synchronously.
    pub fn pump(&mut self) {
        #[cfg(feature = "perf")]
        let pump_started = cogterm_perf_recorder::now_ns();

        while let Some(extract) = self.framer.poll(&mut self.ring) {
            match extract {
                Extract::Frame(f) => self.publish_frame(f),
                Extract::Garbage(bytes) => self.publish_garbage(&bytes),
            }
            if let Some(status) = self.framer.take_sync_change() {
                let _ = self.control.send(ControlMsg::SyncChanged(status));
            }
        }

        let fs = self.framer.stats();
        self.counters.text_lines.store(fs.text_lines, Ordering::Relaxed);
        self.counters.db_packets.store(fs.db_packets, Ordering::Relaxed);
        self.counters
            .status_blocks
            .store(fs.status_blocks, Ordering::Relaxed);
        self.counters
            .garbage_bytes
            .store(fs.garbage_bytes, Ordering::Relaxed);

        #[cfg(feature = "perf")]
        self.perf.observe(
            PerfStage::WorkerTotal,
            cogterm_perf_recorder::now_ns().saturating_sub(pump_started),
        );
    }

    fn publish_frame(&mut self, f: cogterm_framer::Frame) {
        let consume = f.skip + f.length;
        match self.pool.acquire(f.length) {
            Some(mut w) => {
                w.write_tag(f.tag);
                w.write_flags(0);
                if let Some(payload) = self.ring.peek(f.skip, f.length) {
                    w.write_payload(payload);
                }
                self.ring.consume(consume);
                // Refcount is already 1 from acquire; the send below is
                // the publication point.
                self.publish(w.id());
            }
            None => {
                self.ring.consume(consume);
                self.drop_for_pool(f.tag, f.length);
            }
        }
    }

    fn publish_garbage(&mut self, bytes: &[u8]) {
        match self.pool.acquire(bytes.len()) {
            Some(mut w) => {
                w.write_tag(MessageTag::TerminalOutput);
                w.write_flags(flags::DEGRADED);
                w.write_payload(bytes);
                self.publish(w.id());
            }
            None => self.drop_for_pool(MessageTag::TerminalOutput, bytes.len()),
        }
    }

    fn drop_for_pool(&self, tag: MessageTag, len: usize) {
        self.counters.pool_drops.fetch_add(1, Ordering::Relaxed);
        warn!(?tag, len, "pool exhausted, message dropped");
        let _ = self.control.send(ControlMsg::RoutingError {
            kind: RoutingErrorKind::PoolExhausted,
            detail: format!("{tag:?} message of {len} bytes dropped"),
        });
    }

    /// Hands one slot id to the router. Spins briefly on a full signal,
    /// then drops the message rather than stalling the framing path.
    fn publish(&self, id: PoolId) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let deadline = Instant::now() + SIGNAL_SPIN;
        let mut msg = id;
        loop {
            match self.signal.try_send(msg) {
                Ok(()) => {
                    self.counters
                        .messages_published
                        .fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(TrySendError::Full(m)) => {
                    if Instant::now() >= deadline {
                        self.in_flight.fetch_sub(1, Ordering::AcqRel);
                        self.pool.release(id);
                        self.counters.signal_drops.fetch_add(1, Ordering::Relaxed);
                        let _ = self.control.send(ControlMsg::RoutingError {
                            kind: RoutingErrorKind::SignalFull,
                            detail: format!("slot {} dropped, router signal full", id.0),
                        });
                        return;
                    }
                    msg = m;
                    std::hint::spin_loop();
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.in_flight.fetch_sub(1, Ordering::AcqRel);
                    self.pool.release(id);
                    return;
                }
            }
        }
    }
}
