//! Destination capability objects and the stock sink implementations.
//!
//! A destination receives a read-only message view and must be done with
//! it when `deliver` returns; the router releases the pool reference on
//! its behalf afterwards, including on delivery failure. Anything a sink
//! wants to keep, it copies.

use cogbus_events::{BacktickKind, MessageTag};
use cogbus_pool::PoolId;
use crossbeam_channel::Sender;
use tracing::info;

/// Read-only view of one routed message. Valid only inside `deliver`.
#[derive(Debug, Clone, Copy)]
pub struct MessageView<'a> {
    pub tag: MessageTag,
    pub flags: u8,
    pub payload: &'a [u8],
    /// Monotonic nanoseconds at which the router opened the slot.
    pub timestamp_ns: u64,
    pub pool_id: PoolId,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);

pub trait Destination: Send + Sync {
    fn deliver(&self, msg: &MessageView<'_>) -> Result<(), DeliveryError>;
    /// Diagnostic name, used in routing error details.
    fn name(&self) -> &str;
}

/// An owned copy of a message, as forwarded to window channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    pub tag: MessageTag,
    pub flags: u8,
    pub timestamp_ns: u64,
    pub payload: Vec<u8>,
}

impl OwnedMessage {
    fn from_view(msg: &MessageView<'_>) -> Self {
        Self {
            tag: msg.tag,
            flags: msg.flags,
            timestamp_ns: msg.timestamp_ns,
            payload: msg.payload.to_vec(),
        }
    }
}

fn forward(tx: &Sender<OwnedMessage>, who: &str, msg: &MessageView<'_>) -> Result<(), DeliveryError> {
    tx.send(OwnedMessage::from_view(msg))
        .map_err(|_| DeliveryError(format!("{who}: window channel closed")))
}

/// Terminal text consumer: plain output, core messages, unknown lines.
pub struct TerminalSink {
    tx: Sender<OwnedMessage>,
}

impl TerminalSink {
    pub fn new(tx: Sender<OwnedMessage>) -> Self {
        Self { tx }
    }
}

impl Destination for TerminalSink {
    fn deliver(&self, msg: &MessageView<'_>) -> Result<(), DeliveryError> {
        forward(&self.tx, self.name(), msg)
    }

    fn name(&self) -> &str {
        "terminal"
    }
}

/// Per-core debugger window consumer.
pub struct DebuggerWindowSink {
    name: String,
    tx: Sender<OwnedMessage>,
}

impl DebuggerWindowSink {
    pub fn new(core: u8, tx: Sender<OwnedMessage>) -> Self {
        Self {
            name: format!("debugger{core}"),
            tx,
        }
    }
}

impl Destination for DebuggerWindowSink {
    fn deliver(&self, msg: &MessageView<'_>) -> Result<(), DeliveryError> {
        forward(&self.tx, self.name(), msg)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Backtick visualization window consumer (plot, scope, logic, ...).
pub struct BacktickWindowSink {
    name: String,
    tx: Sender<OwnedMessage>,
}

impl BacktickWindowSink {
    pub fn new(kind: BacktickKind, tx: Sender<OwnedMessage>) -> Self {
        Self {
            name: format!("backtick-{kind:?}").to_lowercase(),
            tx,
        }
    }
}

impl Destination for BacktickWindowSink {
    fn deliver(&self, msg: &MessageView<'_>) -> Result<(), DeliveryError> {
        forward(&self.tx, self.name(), msg)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Logs a one-line summary of every message it sees. Diagnostic only.
pub struct LoggerSink;

impl Destination for LoggerSink {
    fn deliver(&self, msg: &MessageView<'_>) -> Result<(), DeliveryError> {
        info!(
            tag = ?msg.tag,
            len = msg.payload.len(),
            flags = msg.flags,
            "message"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "logger"
    }
}
