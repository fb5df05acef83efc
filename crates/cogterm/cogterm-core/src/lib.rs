//! `cogterm-core`: the ingestion and routing pipeline.
//!
//! Wiring, end to end:
//!
//! ```text
//! serial driver ──receive_data──► RingProducer ─┐
//!                                               │ shared ring
//!                     Worker (thread) ◄─────────┘
//!                       │ framer classifies, fills pool slots
//!                       ▼
//!                 slot-id signal (bounded)
//!                       │
//!                  Router (thread) ──deliver──► destinations
//!                       │
//!                 control events ──► control thread ──75-byte reply──► serial
//! ```
//!
//! The processor owns all of it and exposes the public entry points:
//! `start`/`stop`, `receive_data`, the DTR/RTS reset hooks, destination
//! registration and the stats snapshot.

mod control;
mod destination;
mod processor;
mod reset;
mod response;
mod router;
mod stats;
mod usb_log;
mod worker;

pub use control::BreakControl;
pub use destination::{
    BacktickWindowSink, DebuggerWindowSink, DeliveryError, Destination, LoggerSink, MessageView,
    OwnedMessage, TerminalSink,
};
pub use processor::{Processor, SerialLink};
pub use reset::{ResetManager, ResetStats};
pub use response::{DebuggerState, RESPONSE_LEN, RequestSlot};
pub use router::{Router, RouterStats};
pub use stats::{
    PerformanceStats, PipelineCounters, PoolUsage, ProcessorStats, ResetSnapshot, RouterSnapshot,
};
pub use usb_log::{Direction, UsbTrafficLogger};
pub use worker::Worker;

use cogbus_events::{RoutingErrorKind, SyncStatus};

/// Messages from the worker and router threads to the processor's control
/// thread. Public because the worker and router constructors take the
/// sending half; embedders normally never construct one.
#[derive(Debug)]
pub enum ControlMsg {
    /// A per-core debugger block was routed; full frames get a reply.
    DebuggerPacket { core: u8, payload: Vec<u8> },
    /// A `Cog0 INIT` boot banner was routed: the whole target restarted.
    SystemReboot,
    RoutingError {
        kind: RoutingErrorKind,
        detail: String,
    },
    SyncChanged(SyncStatus),
    /// Ends the control thread during `Processor::stop`.
    Shutdown,
}
