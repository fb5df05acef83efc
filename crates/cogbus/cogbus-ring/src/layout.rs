//! Shared region binary layout for the byte ring.
//!
//! The header occupies the first cache line; the byte payload follows
//! immediately after, so cursor traffic never false-shares with data.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ magic │ version │ capacity │ head │ tail │ dropped │   pad   │ (64 B)
//! ├──────────────────────────────────────────────────────────────┤
//! │                 payload bytes [0, capacity)                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::mem::size_of;
use std::sync::atomic::AtomicU64;

/// ASCII "COGRING1" as a little-endian u64.
pub const RING_MAGIC: u64 = 0x3147_4E49_5247_4F43;

/// Increment on incompatible layout changes.
pub const RING_VERSION: u64 = 1;

/// Header stored at offset 0 of every ring region.
///
/// `#[repr(C)]` keeps the field order fixed; padding rounds the struct to
/// 64 bytes so the header and payload stay on separate cache lines.
#[repr(C)]
pub struct RingHeader {
    pub magic: u64,
    pub version: u64,
    /// Payload capacity in bytes. Power of two.
    pub capacity: u64,
    /// Read cursor, wrapped to `[0, capacity)`. Advanced by the consumer,
    /// and by the producer only while dropping the oldest bytes on
    /// overflow. Both sides use compare-exchange.
    pub head: AtomicU64,
    /// Write cursor, wrapped to `[0, capacity)`. Advanced by the producer
    /// only; the Release store here publishes the payload bytes.
    pub tail: AtomicU64,
    /// Total bytes dropped by overflow since creation.
    pub dropped_bytes: AtomicU64,
    _pad: [u8; 16],
}

impl RingHeader {
    pub fn new(capacity: u64) -> Self {
        Self {
            magic: RING_MAGIC,
            version: RING_VERSION,
            capacity,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            dropped_bytes: AtomicU64::new(0),
            _pad: [0; 16],
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.magic != RING_MAGIC {
            return Err("Bad magic");
        }
        if self.version != RING_VERSION {
            return Err("Wrong version");
        }
        if !(self.capacity as usize).is_power_of_two() {
            return Err("Capacity must be power of two");
        }
        Ok(())
    }
}

/// Total bytes required for a ring region of the given payload capacity.
pub fn bytes_for_ring(capacity: usize) -> usize {
    size_of::<RingHeader>() + capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fits_one_cache_line() {
        assert_eq!(size_of::<RingHeader>(), 64, "RingHeader layout changed");
    }

    #[test]
    fn validate_rejects_corruption() {
        let good = RingHeader::new(1024);
        assert!(good.validate().is_ok());

        let mut bad = RingHeader::new(1024);
        bad.magic = 0;
        assert_eq!(bad.validate(), Err("Bad magic"));

        let mut bad = RingHeader::new(1024);
        bad.capacity = 1000;
        assert_eq!(bad.validate(), Err("Capacity must be power of two"));
    }
}
