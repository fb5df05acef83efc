//! `cogbus-ring`: single-producer single-consumer byte ring over shared
//! memory.
//!
//! The serial driver callback writes raw USB bytes on one side and the
//! framing worker reads them on the other, with no lock on either path:
//!
//! ```text
//! ┌──────────────┐      shared region       ┌──────────────┐
//! │ RingProducer │ ──────────────────────── │ RingConsumer │
//! │ (USB thread) │   header + byte payload  │   (worker)   │
//! └──────────────┘                          └──────────────┘
//! ```
//!
//! # Semantics
//!
//! - FIFO byte stream; one cell is always reserved so full and empty are
//!   distinguishable (`used + free == capacity - 1`).
//! - The producer never blocks: when an incoming buffer exceeds the free
//!   space, the oldest unread bytes are dropped to make room and the drop
//!   is counted for the overflow event.
//! - `peek` exposes a contiguous read-only view at any offset inside the
//!   unread span; `consume` advances the read cursor.
//!
//! # Synchronization
//!
//! Payload bytes are published by a Release store of `tail` and observed
//! through an Acquire load; the read cursor moves by compare-exchange so a
//! producer-side overflow drop can never lose a concurrent `consume`.
//!
//! # Internal Modules
//!
//! - `ring`: capacity configuration and cursor arithmetic
//! - `layout`: shared region binary layout
//! - `spsc`: the producer/consumer pair

mod layout;
mod ring;
mod spsc;

pub use ring::RingConfig;
pub use spsc::{RingConsumer, RingProducer, WriteOutcome, byte_ring, byte_ring_at};
