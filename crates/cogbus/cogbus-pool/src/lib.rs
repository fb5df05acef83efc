//! `cogbus-pool`: size-classed, reference-counted slot allocator over
//! shared memory.
//!
//! Extracted messages travel from the framing worker to the router and its
//! destinations as slot ids, never as copies. A slot is jointly owned by
//! exactly `refcount` holders; when the count returns to zero the slot is
//! immediately reusable.
//!
//! # Size classes
//!
//! - Small: 10 000 slots of 128 bytes. Typical text lines and short
//!   backtick commands.
//! - Large: 500 slots of 8 192 bytes. Debugger frames and long data
//!   packets. The framer never emits a message above the large payload
//!   capacity (8 184 bytes), so there is no fallback concatenation.
//!
//! # Ownership protocol
//!
//! `acquire` claims a slot by compare-exchanging its refcount from 0 to 1.
//! The worker fills the payload while it is the sole holder, then hands
//! the id across a channel whose send carries release semantics; the
//! router adds `k - 1` references for `k` destinations and every
//! destination releases exactly once. A release that would drive the count
//! negative marks the slot poisoned and retires it.

mod layout;
mod slot;

pub use layout::{POISONED, SLOT_HEADER_BYTES};
pub use slot::{SlotRef, SlotWriter};

use cogbus_events::MessageTag;
use cogbus_mmap::SharedRegionMut;
use layout::{OFF_REFCOUNT, PoolHeader, bytes_for_pool};
use std::io;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::error;

/// Index of a slot across both classes. Ids below the small-slot count
/// address the small arena; the rest address the large arena.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolId(pub u32);

/// The two slot classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotClass {
    Small,
    Large,
}

#[derive(Debug, Copy, Clone)]
pub struct PoolConfig {
    pub small_slots: usize,
    pub small_size: usize,
    pub large_slots: usize,
    pub large_size: usize,
}

impl PoolConfig {
    /// The standard pipeline sizing.
    pub fn standard() -> Self {
        Self {
            small_slots: 10_000,
            small_size: 128,
            large_slots: 500,
            large_size: 8_192,
        }
    }

    #[inline]
    pub fn small_payload(&self) -> usize {
        self.small_size - SLOT_HEADER_BYTES
    }

    #[inline]
    pub fn large_payload(&self) -> usize {
        self.large_size - SLOT_HEADER_BYTES
    }

    #[inline]
    pub fn total_slots(&self) -> usize {
        self.small_slots + self.large_slots
    }
}

/// Usage counters exposed through the processor stats surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub small_in_use: u64,
    pub large_in_use: u64,
    pub small_overflow: u64,
    pub large_overflow: u64,
    pub poisoned: u64,
}

/// The allocator. Shared across worker, router and destinations behind an
/// `Arc`; every operation takes `&self`.
pub struct MessagePool {
    /// Keeps the mapping alive.
    _region: SharedRegionMut,
    base: *const u8,
    small_base: *const u8,
    large_base: *const u8,
    cfg: PoolConfig,
}

// SAFETY: all cross-thread state is reached through the per-slot atomic
// refcount words; payload bytes are only written by the single holder
// between acquire and publication, and read-only afterwards. The region
// itself is owned by this struct for its whole lifetime.
unsafe impl Send for MessagePool {}
unsafe impl Sync for MessagePool {}

impl MessagePool {
    pub fn new(cfg: PoolConfig) -> io::Result<Self> {
        assert!(cfg.small_size > SLOT_HEADER_BYTES);
        assert!(cfg.large_size > SLOT_HEADER_BYTES);
        // Slot strides must keep the refcount word 4-aligned.
        assert!(cfg.small_size % 8 == 0 && cfg.large_size % 8 == 0);
        assert!(cfg.total_slots() < POISONED as usize);

        let bytes = bytes_for_pool(
            cfg.small_slots,
            cfg.small_size,
            cfg.large_slots,
            cfg.large_size,
        );
        let mut region = SharedRegionMut::anon(bytes)?;
        let base = region.as_mut_ptr();

        // SAFETY: the region is freshly mapped and sized by bytes_for_pool;
        // anonymous mappings are zeroed, so every refcount starts at 0.
        unsafe {
            let h = base as *mut PoolHeader;
            std::ptr::write(
                h,
                PoolHeader::new(
                    cfg.small_slots as u64,
                    cfg.small_size as u64,
                    cfg.large_slots as u64,
                    cfg.large_size as u64,
                ),
            );
        }

        let small_base = unsafe { base.add(size_of::<PoolHeader>()) as *const u8 };
        let large_base = unsafe { small_base.add(cfg.small_slots * cfg.small_size) };

        Ok(Self {
            _region: region,
            base,
            small_base,
            large_base,
            cfg,
        })
    }

    pub fn standard() -> io::Result<Self> {
        Self::new(PoolConfig::standard())
    }

    pub fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    #[inline(always)]
    fn header(&self) -> &PoolHeader {
        // SAFETY: base points at the header written in new().
        unsafe { &*(self.base as *const PoolHeader) }
    }

    #[inline]
    pub fn class_of(&self, id: PoolId) -> SlotClass {
        if (id.0 as usize) < self.cfg.small_slots {
            SlotClass::Small
        } else {
            SlotClass::Large
        }
    }

    /// Raw pointer to the start of a slot (its inline header).
    #[inline(always)]
    pub(crate) fn slot_ptr(&self, id: PoolId) -> *const u8 {
        let idx = id.0 as usize;
        assert!(idx < self.cfg.total_slots(), "pool id out of range");
        // SAFETY: idx was bounds-checked against the arena this pointer
        // arithmetic stays within.
        unsafe {
            if idx < self.cfg.small_slots {
                self.small_base.add(idx * self.cfg.small_size)
            } else {
                self.large_base
                    .add((idx - self.cfg.small_slots) * self.cfg.large_size)
            }
        }
    }

    /// Payload capacity of the slot's class.
    #[inline]
    pub(crate) fn payload_capacity(&self, id: PoolId) -> usize {
        match self.class_of(id) {
            SlotClass::Small => self.cfg.small_payload(),
            SlotClass::Large => self.cfg.large_payload(),
        }
    }

    #[inline(always)]
    fn refcount_atomic(&self, id: PoolId) -> &AtomicU32 {
        // SAFETY: the refcount word is the first field of the slot header,
        // 4-aligned because slot sizes and the header size are multiples
        // of 8.
        unsafe { &*(self.slot_ptr(id).add(OFF_REFCOUNT) as *const AtomicU32) }
    }

    /// Claims a free slot whose payload capacity fits `size`. Returns
    /// `None` (and counts the overflow) when the class is exhausted or
    /// `size` exceeds the large payload capacity.
    pub fn acquire(&self, size: usize) -> Option<SlotWriter<'_>> {
        let (class, first, count) = if size <= self.cfg.small_payload() {
            (SlotClass::Small, 0usize, self.cfg.small_slots)
        } else if size <= self.cfg.large_payload() {
            (SlotClass::Large, self.cfg.small_slots, self.cfg.large_slots)
        } else {
            return None;
        };

        // The scan starts at slot 0 of the class each call; freed low ids
        // get reused first, which keeps the hot set compact.
        for idx in first..first + count {
            let id = PoolId(idx as u32);
            if self
                .refcount_atomic(id)
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(SlotWriter::new(self, id));
            }
        }

        match class {
            SlotClass::Small => self.header().small_overflow.fetch_add(1, Ordering::Relaxed),
            SlotClass::Large => self.header().large_overflow.fetch_add(1, Ordering::Relaxed),
        };
        None
    }

    /// Opens an already-acquired slot for reading. The caller must hold a
    /// reference obtained through `acquire`/`increment` hand-off.
    pub fn get(&self, id: PoolId) -> SlotRef<'_> {
        SlotRef::new(self, id)
    }

    /// Adds `n` references before handing a slot to multiple consumers.
    pub fn increment(&self, id: PoolId, n: u32) {
        assert!(n >= 1, "increment of zero references");
        self.refcount_atomic(id).fetch_add(n, Ordering::AcqRel);
    }

    /// Drops one reference. On the transition to zero the slot becomes
    /// reusable at once. A release below zero is a programming error: the
    /// slot is poisoned and never handed out again.
    pub fn release(&self, id: PoolId) {
        let rc = self.refcount_atomic(id);
        if rc.load(Ordering::Relaxed) == POISONED {
            return;
        }
        let prev = rc.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // Underflow. The wrap already landed on the poison sentinel
            // (0 - 1 == u32::MAX); make that explicit and retire the slot.
            rc.store(POISONED, Ordering::Release);
            self.header().poisoned.fetch_add(1, Ordering::Relaxed);
            error!(slot = id.0, "double release detected, slot poisoned");
            debug_assert!(false, "double release of pool slot {}", id.0);
        }
    }

    /// Reads the tag byte only. Fast path for routing decisions.
    pub fn message_type(&self, id: PoolId) -> Option<MessageTag> {
        self.get(id).tag()
    }

    /// Current refcount. Diagnostic; racy by nature.
    pub fn refcount(&self, id: PoolId) -> u32 {
        self.refcount_atomic(id).load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        let h = self.header();
        let mut small_in_use = 0;
        for idx in 0..self.cfg.small_slots {
            let rc = self.refcount(PoolId(idx as u32));
            if rc != 0 && rc != POISONED {
                small_in_use += 1;
            }
        }
        let mut large_in_use = 0;
        for idx in self.cfg.small_slots..self.cfg.total_slots() {
            let rc = self.refcount(PoolId(idx as u32));
            if rc != 0 && rc != POISONED {
                large_in_use += 1;
            }
        }
        PoolStats {
            small_in_use,
            large_in_use,
            small_overflow: h.small_overflow.load(Ordering::Relaxed),
            large_overflow: h.large_overflow.load(Ordering::Relaxed),
            poisoned: h.poisoned.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_refcount(&self, id: PoolId, value: u32) {
        self.refcount_atomic(id).store(value, Ordering::Release);
    }
}
