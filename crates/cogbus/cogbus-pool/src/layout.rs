//! Shared region binary layout for the message pool.
//!
//! One contiguous region holds a header, the small-class arena and the
//! large-class arena. Every slot starts with an 8-byte inline header whose
//! first word is the atomic refcount; the strided sequence of those words
//! is the pool's refcount array.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ PoolHeader (128 B)                                            │
//! ├───────────────────────────────────────────────────────────────┤
//! │ small slot 0 │ small slot 1 │ ...  (small_slots × small_size) │
//! ├───────────────────────────────────────────────────────────────┤
//! │ large slot 0 │ large slot 1 │ ...  (large_slots × large_size) │
//! └───────────────────────────────────────────────────────────────┘
//!
//! slot:  [refcount:u32][tag:u8][length:u16 LE][flags:u8][payload...]
//! ```

use std::mem::size_of;
use std::sync::atomic::AtomicU64;

/// ASCII "COGPOOL1" as a little-endian u64.
pub const POOL_MAGIC: u64 = 0x314C_4F4F_5047_4F43;

pub const POOL_VERSION: u64 = 1;

/// Inline slot header: refcount + tag + length + flags.
pub const SLOT_HEADER_BYTES: usize = 8;

/// Byte offsets of the header fields inside a slot.
pub const OFF_REFCOUNT: usize = 0;
pub const OFF_TAG: usize = 4;
pub const OFF_LENGTH: usize = 5;
pub const OFF_FLAGS: usize = 7;

/// Refcount sentinel for a slot excluded from further use after a
/// detected double release.
pub const POISONED: u32 = u32::MAX;

/// Region header. `#[repr(C)]`, padded to 128 bytes so slot 0 starts on
/// its own cache line pair.
#[repr(C)]
pub struct PoolHeader {
    pub magic: u64,
    pub version: u64,
    pub small_slots: u64,
    pub small_size: u64,
    pub large_slots: u64,
    pub large_size: u64,
    /// Failed small-class acquires (class scanned without a free slot).
    pub small_overflow: AtomicU64,
    /// Failed large-class acquires.
    pub large_overflow: AtomicU64,
    /// Slots permanently retired after a refcount underflow.
    pub poisoned: AtomicU64,
    _pad: [u8; 56],
}

impl PoolHeader {
    pub fn new(small_slots: u64, small_size: u64, large_slots: u64, large_size: u64) -> Self {
        Self {
            magic: POOL_MAGIC,
            version: POOL_VERSION,
            small_slots,
            small_size,
            large_slots,
            large_size,
            small_overflow: AtomicU64::new(0),
            large_overflow: AtomicU64::new(0),
            poisoned: AtomicU64::new(0),
            _pad: [0; 56],
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.magic != POOL_MAGIC {
            return Err("Bad magic");
        }
        if self.version != POOL_VERSION {
            return Err("Wrong version");
        }
        if self.small_size as usize <= SLOT_HEADER_BYTES
            || self.large_size as usize <= SLOT_HEADER_BYTES
        {
            return Err("Slot size smaller than header");
        }
        Ok(())
    }
}

/// Total bytes for a pool region.
pub fn bytes_for_pool(
    small_slots: usize,
    small_size: usize,
    large_slots: usize,
    large_size: usize,
) -> usize {
    size_of::<PoolHeader>() + small_slots * small_size + large_slots * large_size
}
