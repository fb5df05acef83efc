//! Pipeline ownership and the public entry points.
//!
//! The processor wires the receive path (ring producer), the worker and
//! router threads, the control thread that answers debugger frames, the
//! reset manager and the optional USB traffic dump. External code talks
//! to the serial driver; the processor only sees byte buffers and
//! control-line transitions.

use crate::control::BreakControl;
use crate::destination::Destination;
use crate::reset::ResetManager;
use crate::response::DebuggerState;
use crate::router::Router;
use crate::stats::{PipelineCounters, ProcessorStats};
use crate::usb_log::{Direction, UsbTrafficLogger};
use crate::worker::Worker;
use crate::ControlMsg;
use cogbus_events::{
    BacktickKind, MessageTag, NUM_CORES, PipelineEvent, ResetKind, SyncStatus,
};
use cogbus_pool::{MessagePool, PoolConfig, PoolId};
use cogbus_ring::{RingConfig, RingProducer, byte_ring};
use cogterm_config::TermConfig;
use cogterm_framer::{Framer, SyncCell};
use cogterm_util::now_ns;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The write half of the serial driver, the only part the pipeline calls
/// into. Reads and control-line events come in through `receive_data`,
/// `on_dtr_reset` and `on_rts_reset`.
pub trait SerialLink: Send + Sync {
    fn write(&self, bytes: &[u8]) -> io::Result<()>;
}

const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Processor {
    producer: Mutex<RingProducer>,
    wake_tx: Sender<()>,
    pool: Arc<MessagePool>,
    router: Arc<Router>,
    reset: Arc<ResetManager>,
    sync: Arc<SyncCell>,
    usb_log: Option<Arc<UsbTrafficLogger>>,
    serial: Arc<dyn SerialLink>,
    break_ctl: Arc<BreakControl>,
    counters: Arc<PipelineCounters>,
    events_tx: Sender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,
    control_tx: Sender<ControlMsg>,
    shutdown: Arc<AtomicBool>,
    in_flight: Arc<AtomicU64>,
    rotate_seq: Arc<AtomicU64>,
    started: Instant,
    /// Standard-routing sinks the processor keeps alive on behalf of the
    /// caller; the router itself only holds weak references.
    retained: Mutex<Vec<Arc<dyn Destination>>>,

    // Staged until start(), joined in stop().
    staged_worker: Mutex<Option<Worker>>,
    staged_signal_rx: Mutex<Option<Receiver<PoolId>>>,
    staged_control_rx: Mutex<Option<Receiver<ControlMsg>>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    router_handle: Mutex<Option<JoinHandle<()>>>,
    control_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Processor {
    pub fn new(config: &TermConfig, serial: Arc<dyn SerialLink>) -> io::Result<Self> {
        let (producer, consumer) = byte_ring(RingConfig::new(config.ring_capacity))?;
        let pool = Arc::new(MessagePool::new(PoolConfig {
            small_slots: config.small_slots,
            large_slots: config.large_slots,
            ..PoolConfig::standard()
        })?);

        let sync = Arc::new(SyncCell::new());
        let in_flight = Arc::new(AtomicU64::new(0));
        let counters = Arc::new(PipelineCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let (signal_tx, signal_rx) = bounded(config.signal_depth);
        let (control_tx, control_rx) = unbounded();
        let (wake_tx, wake_rx) = bounded(1);
        let (events_tx, events_rx) = unbounded();

        let worker = Worker::new(
            consumer,
            Framer::new(Arc::clone(&sync)),
            Arc::clone(&pool),
            signal_tx,
            control_tx.clone(),
            Arc::clone(&in_flight),
            Arc::clone(&counters),
            Arc::clone(&shutdown),
            wake_rx,
        );
        let router = Arc::new(Router::new(
            Arc::clone(&pool),
            control_tx.clone(),
            Arc::clone(&in_flight),
        ));
        let reset = Arc::new(ResetManager::new(
            Arc::clone(&sync),
            Arc::clone(&in_flight),
            config.reset_history_path.as_deref(),
        )?);

        let usb_log = match &config.usb_dump_path {
            Some(path) => Some(Arc::new(UsbTrafficLogger::create(path)?)),
            None => None,
        };

        Ok(Self {
            producer: Mutex::new(producer),
            wake_tx,
            pool,
            router,
            reset,
            sync,
            usb_log,
            serial,
            break_ctl: Arc::new(BreakControl::new()),
            counters,
            events_tx,
            events_rx,
            control_tx,
            shutdown,
            in_flight,
            rotate_seq: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
            retained: Mutex::new(Vec::new()),
            staged_worker: Mutex::new(Some(worker)),
            staged_signal_rx: Mutex::new(Some(signal_rx)),
            staged_control_rx: Mutex::new(Some(control_rx)),
            worker_handle: Mutex::new(None),
            router_handle: Mutex::new(None),
            control_handle: Mutex::new(None),
        })
    }

    /// Spawns the worker, router and control threads. Idempotent: a
    /// second call finds nothing staged and does nothing.
    pub fn start(&self) -> io::Result<()> {
        if let Some(worker) = self.staged_worker.lock().expect("worker stage").take() {
            let handle = std::thread::Builder::new()
                .name("cogterm-worker".into())
                .spawn(move || worker.run())?;
            *self.worker_handle.lock().expect("worker handle") = Some(handle);
        }

        if let Some(signal_rx) = self.staged_signal_rx.lock().expect("signal stage").take() {
            let router = Arc::clone(&self.router);
            let handle = std::thread::Builder::new()
                .name("cogterm-router".into())
                .spawn(move || router.run(signal_rx))?;
            *self.router_handle.lock().expect("router handle") = Some(handle);
        }

        if let Some(control_rx) = self.staged_control_rx.lock().expect("control stage").take() {
            let handle = self.spawn_control_thread(control_rx)?;
            *self.control_handle.lock().expect("control handle") = Some(handle);
        }

        info!("pipeline started");
        Ok(())
    }

    fn spawn_control_thread(
        &self,
        control_rx: Receiver<ControlMsg>,
    ) -> io::Result<JoinHandle<()>> {
        let serial = Arc::clone(&self.serial);
        let break_ctl = Arc::clone(&self.break_ctl);
        let usb_log = self.usb_log.clone();
        let events = self.events_tx.clone();
        // Rotation numbers are shared with control-line resets.
        let rotate_seq = Arc::clone(&self.rotate_seq);

        std::thread::Builder::new()
            .name("cogterm-control".into())
            .spawn(move || {
                let mut states: Vec<DebuggerState> =
                    (0..NUM_CORES as u8).map(DebuggerState::new).collect();
                for msg in control_rx {
                    match msg {
                        ControlMsg::DebuggerPacket { core, payload } => {
                            let _ = events.send(PipelineEvent::DebuggerPacketReceived { core });
                            let state = &mut states[core as usize];
                            if let Some(reply) = state.ingest(&payload, &break_ctl) {
                                match serial.write(&reply) {
                                    Ok(()) => {
                                        if let Some(log) = &usb_log {
                                            log.log(Direction::Send, &reply);
                                        }
                                    }
                                    Err(e) => {
                                        warn!(core, error = %e, "debugger reply write failed")
                                    }
                                }
                            }
                        }
                        ControlMsg::SystemReboot => {
                            info!("target reported full system restart");
                            let _ = events.send(PipelineEvent::P2SystemReboot);
                            let _ = events.send(PipelineEvent::RotateLog {
                                sequence: rotate_seq.fetch_add(1, Ordering::AcqRel),
                            });
                        }
                        ControlMsg::RoutingError { kind, detail } => {
                            let _ = events.send(PipelineEvent::RoutingError { kind, detail });
                        }
                        ControlMsg::SyncChanged(status) => {
                            let _ = events.send(PipelineEvent::SyncStatusChanged(status));
                        }
                        ControlMsg::Shutdown => break,
                    }
                }
            })
    }

    /// Entry point for USB reads: logs the buffer, writes it into the
    /// ring (dropping oldest history on overflow) and wakes the worker.
    pub fn receive_data(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(log) = &self.usb_log {
            log.log(Direction::Recv, bytes);
        }

        let outcome = self.producer.lock().expect("ring producer").write(bytes);
        self.counters
            .bytes_received
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        if outcome.dropped > 0 {
            // History is gone; downstream must re-acquire boundaries.
            if self.sync.clear(now_ns()) {
                let _ = self
                    .events_tx
                    .send(PipelineEvent::SyncStatusChanged(self.sync.status()));
            }
            let _ = self.events_tx.send(PipelineEvent::BufferOverflow {
                dropped_bytes: outcome.dropped,
            });
            warn!(dropped = outcome.dropped, "ring overflow, oldest bytes lost");
        }

        let _ = self.wake_tx.try_send(());
    }

    pub fn on_dtr_reset(&self) {
        self.on_reset(ResetKind::Dtr);
    }

    pub fn on_rts_reset(&self) {
        self.on_reset(ResetKind::Rts);
    }

    /// Runs the full reset sequence: marker, events, drain barrier, log
    /// rotation. Blocks the caller (the control-line callback), never the
    /// data path.
    fn on_reset(&self, kind: ResetKind) {
        let event = self.reset.record(kind);
        let _ = self.events_tx.send(PipelineEvent::ResetDetected(event));
        let _ = self
            .events_tx
            .send(PipelineEvent::SyncStatusChanged(self.sync.status()));

        if let Err(in_flight) = self.reset.drain() {
            let _ = self.events_tx.send(PipelineEvent::DrainTimeout { in_flight });
        }
        let _ = self.events_tx.send(PipelineEvent::RotateLog {
            sequence: self.rotate_seq.fetch_add(1, Ordering::AcqRel),
        });
    }

    /// Adds a destination for one tag. The caller owns the destination;
    /// the router drops the row when it goes away.
    pub fn register_destination(&self, tag: MessageTag, dest: &Arc<dyn Destination>) {
        self.router.register(tag, dest);
    }

    /// Wires the stock routing table: terminal text and core messages to
    /// the terminal (or a per-core cog router), each backtick kind to its
    /// window, per-core debugger blocks to their sinks, and optionally a
    /// logger across every tag.
    pub fn apply_standard_routing(
        &self,
        logger: Option<Arc<dyn Destination>>,
        window_creator: &dyn Fn(BacktickKind) -> Arc<dyn Destination>,
        terminal: Arc<dyn Destination>,
        debugger_sink: Option<&dyn Fn(u8) -> Arc<dyn Destination>>,
        cog_router: Option<&dyn Fn(u8) -> Arc<dyn Destination>>,
    ) {
        let mut retained = self.retained.lock().expect("retained sinks");

        for tag in [
            MessageTag::TerminalOutput,
            MessageTag::InvalidCog,
            MessageTag::P2SystemInit,
        ] {
            self.router.register(tag, &terminal);
        }

        for core in 0..NUM_CORES as u8 {
            match cog_router {
                Some(make) => {
                    let dest = make(core);
                    self.router.register(MessageTag::cog_message(core), &dest);
                    retained.push(dest);
                }
                None => self.router.register(MessageTag::cog_message(core), &terminal),
            }
        }

        for kind in BacktickKind::ALL {
            let dest = window_creator(kind);
            self.router.register(MessageTag::backtick(kind), &dest);
            retained.push(dest);
        }

        if let Some(make) = debugger_sink {
            for core in 0..NUM_CORES as u8 {
                let dest = make(core);
                self.router.register(MessageTag::debugger(core), &dest);
                retained.push(dest);
            }
        }

        if let Some(logger) = logger {
            for raw in 0..=MessageTag::MAX_WIRE {
                if let Some(tag) = MessageTag::from_wire(raw) {
                    self.router.register(tag, &logger);
                }
            }
            retained.push(logger);
        }

        retained.push(terminal);
    }

    /// Cooperative shutdown: flag the worker, drain the router, join all
    /// three threads, close the dump. A drain timeout is logged and
    /// otherwise ignored.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());

        let deadline = Instant::now() + STOP_DRAIN_TIMEOUT;
        while self.in_flight.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                let in_flight = self.in_flight.load(Ordering::Acquire);
                warn!(in_flight, "stop drain timed out");
                let _ = self.events_tx.send(PipelineEvent::DrainTimeout { in_flight });
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        if let Some(handle) = self.worker_handle.lock().expect("worker handle").take() {
            let _ = handle.join();
        }
        // The worker dropped its signal sender; the router loop ends once
        // the queue is empty.
        if let Some(handle) = self.router_handle.lock().expect("router handle").take() {
            let _ = handle.join();
        }
        let _ = self.control_tx.send(ControlMsg::Shutdown);
        if let Some(handle) = self.control_handle.lock().expect("control handle").take() {
            let _ = handle.join();
        }

        if let Some(log) = &self.usb_log {
            log.close();
        }
        info!("pipeline stopped");
    }

    /// Event stream for the embedding application.
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events_rx.clone()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn break_control(&self) -> &Arc<BreakControl> {
        &self.break_ctl
    }

    pub fn stats(&self) -> ProcessorStats {
        let ring_dropped = self.producer.lock().expect("ring producer").dropped_bytes();
        ProcessorStats {
            pool: self.pool.stats().into(),
            router: self.router.stats().into(),
            reset: self.reset.stats().into(),
            uptime_secs: self.started.elapsed().as_secs(),
            performance: self.counters.performance(ring_dropped),
        }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.stop();
    }
}
