//! Slot handles: the write side used by the framing worker between
//! acquire and publication, and the read side used by the router and
//! destinations.
//!
//! Field layout inside a slot (all little-endian):
//!
//! ```text
//! [refcount:u32][tag:u8][length:u16][flags:u8][payload: length bytes]
//! ```
//!
//! The payload is never mutated after the worker completes a slot; readers
//! borrow a view bounded by `length` and must not hold it past their
//! release.

use crate::layout::{OFF_FLAGS, OFF_LENGTH, OFF_TAG, SLOT_HEADER_BYTES};
use crate::{MessagePool, PoolId};
use cogbus_events::MessageTag;
use std::ptr;

/// Exclusive write handle, valid between `acquire` and publication.
pub struct SlotWriter<'a> {
    pool: &'a MessagePool,
    id: PoolId,
}

impl<'a> SlotWriter<'a> {
    pub(crate) fn new(pool: &'a MessagePool, id: PoolId) -> Self {
        Self { pool, id }
    }

    #[inline]
    pub fn id(&self) -> PoolId {
        self.id
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        self.pool.slot_ptr(self.id) as *mut u8
    }

    pub fn write_tag(&mut self, tag: MessageTag) {
        // SAFETY: exclusive holder; OFF_TAG is inside the slot header.
        unsafe { ptr::write(self.base().add(OFF_TAG), tag.wire()) }
    }

    pub fn write_length(&mut self, length: u16) {
        let le = length.to_le_bytes();
        // SAFETY: exclusive holder; two bytes at OFF_LENGTH are inside the
        // slot header.
        unsafe {
            ptr::write(self.base().add(OFF_LENGTH), le[0]);
            ptr::write(self.base().add(OFF_LENGTH + 1), le[1]);
        }
    }

    pub fn write_flags(&mut self, flags: u8) {
        // SAFETY: exclusive holder; OFF_FLAGS is inside the slot header.
        unsafe { ptr::write(self.base().add(OFF_FLAGS), flags) }
    }

    /// Copies the payload in and records its length.
    pub fn write_payload(&mut self, payload: &[u8]) {
        let cap = self.pool.payload_capacity(self.id);
        assert!(payload.len() <= cap, "payload exceeds slot class capacity");
        assert!(payload.len() <= u16::MAX as usize);
        // SAFETY: exclusive holder; the span was checked against the
        // class payload capacity.
        unsafe {
            ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.base().add(SLOT_HEADER_BYTES),
                payload.len(),
            );
        }
        self.write_length(payload.len() as u16);
    }

    /// Sets the initial reference count ahead of publication. Acquire
    /// already claimed the slot with count 1; the worker calls this when a
    /// different initial count is wanted.
    pub fn set_refcount(&mut self, value: u32) {
        self.pool.set_refcount(self.id, value);
    }
}

/// Read-only view of a published slot. The caller must hold a reference
/// for as long as the view (or any borrow of its payload) is alive.
pub struct SlotRef<'a> {
    pool: &'a MessagePool,
    id: PoolId,
}

impl<'a> SlotRef<'a> {
    pub(crate) fn new(pool: &'a MessagePool, id: PoolId) -> Self {
        Self { pool, id }
    }

    #[inline]
    pub fn id(&self) -> PoolId {
        self.id
    }

    #[inline]
    fn base(&self) -> *const u8 {
        self.pool.slot_ptr(self.id)
    }

    /// Decoded tag byte; `None` if the header holds an unknown value.
    pub fn tag(&self) -> Option<MessageTag> {
        // SAFETY: holder of a reference; header bytes are published.
        let raw = unsafe { ptr::read(self.base().add(OFF_TAG)) };
        MessageTag::from_wire(raw)
    }

    pub fn length(&self) -> usize {
        // SAFETY: holder of a reference; header bytes are published.
        let le = unsafe {
            [
                ptr::read(self.base().add(OFF_LENGTH)),
                ptr::read(self.base().add(OFF_LENGTH + 1)),
            ]
        };
        u16::from_le_bytes(le) as usize
    }

    pub fn flags(&self) -> u8 {
        // SAFETY: holder of a reference; header bytes are published.
        unsafe { ptr::read(self.base().add(OFF_FLAGS)) }
    }

    /// Borrowed payload view bounded by the recorded length.
    pub fn payload(&self) -> &'a [u8] {
        let len = self.length().min(self.pool.payload_capacity(self.id));
        // SAFETY: the span is inside the slot and was published before the
        // slot id reached any reader; payload bytes are immutable while
        // any reference is held.
        unsafe { std::slice::from_raw_parts(self.base().add(SLOT_HEADER_BYTES), len) }
    }

    pub fn refcount(&self) -> u32 {
        self.pool.refcount(self.id)
    }
}
