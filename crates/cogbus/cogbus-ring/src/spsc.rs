//! The producer/consumer pair over one shared ring region.
//!
//! One `RingProducer` (the serial driver callback) and one `RingConsumer`
//! (the framing worker). Cursors live in the region header; payload bytes
//! are published by the Release store of `tail` and observed through an
//! Acquire load, so no mutex is involved on either path.
//!
//! # Thread Safety
//!
//! - `RingProducer` is `Send` but not `Sync`: exactly one thread writes.
//! - `RingConsumer` is `Send` but not `Sync`: exactly one thread reads.
//!
//! The only point where both sides touch the same cursor is the overflow
//! path, where the producer drops the oldest unread bytes by advancing
//! `head`; both sides move `head` with compare-exchange so neither update
//! can be lost.

use crate::layout::{RingHeader, bytes_for_ring};
use crate::ring::{RingConfig, free_bytes, pos_to_index, used_bytes};
use cogbus_mmap::SharedRegionMut;
use std::io;
use std::mem::size_of;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Result of one `write` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes of `src` now present in the ring.
    pub written: usize,
    /// Oldest bytes dropped to make room (0 in normal operation).
    pub dropped: u64,
}

/// The writing half. Owned by the serial receive path.
pub struct RingProducer {
    /// Keeps the mapping alive; never accessed after construction.
    _region: Arc<SharedRegionMut>,
    base: *const u8,
    data: *mut u8,
    mask: u64,
    capacity: u64,
}

/// The reading half. Owned by the framing worker.
pub struct RingConsumer {
    /// Keeps the mapping alive; never accessed after construction.
    _region: Arc<SharedRegionMut>,
    base: *const u8,
    data: *const u8,
    mask: u64,
    capacity: u64,
    /// Scratch for linearizing peeks. Reused across calls.
    scratch: Vec<u8>,
}

// SAFETY: both halves only contain raw pointers into the mapped region,
// which the Arc keeps alive for their whole lifetime. All shared state is
// reached through atomics in the header; the payload protocol is SPSC by
// construction (one producer half, one consumer half exist per ring).
unsafe impl Send for RingProducer {}
unsafe impl Send for RingConsumer {}

/// Creates an anonymous ring and returns both halves. This is the standard
/// single-process construction.
pub fn byte_ring(cfg: RingConfig) -> io::Result<(RingProducer, RingConsumer)> {
    let region = SharedRegionMut::anon(bytes_for_ring(cfg.capacity))?;
    Ok(split_region(region, cfg))
}

/// Creates a file-backed ring at `path` and returns both halves. External
/// tooling (or a second process) can attach to the file afterwards.
pub fn byte_ring_at<P: AsRef<Path>>(
    path: P,
    cfg: RingConfig,
) -> io::Result<(RingProducer, RingConsumer)> {
    let region = SharedRegionMut::create_rw(path, bytes_for_ring(cfg.capacity) as u64)?;
    Ok(split_region(region, cfg))
}

fn split_region(mut region: SharedRegionMut, cfg: RingConfig) -> (RingProducer, RingConsumer) {
    let base = region.as_mut_ptr();

    // SAFETY: the region was sized by bytes_for_ring, so the header fits at
    // offset 0 and the payload directly after it.
    unsafe {
        let h = base as *mut RingHeader;
        ptr::write(h, RingHeader::new(cfg.capacity as u64));
    }

    let region = Arc::new(region);
    let data = unsafe { (base as *mut u8).add(size_of::<RingHeader>()) };

    let producer = RingProducer {
        _region: Arc::clone(&region),
        base,
        data,
        mask: cfg.mask(),
        capacity: cfg.capacity as u64,
    };
    let consumer = RingConsumer {
        _region: region,
        base,
        data,
        mask: cfg.mask(),
        capacity: cfg.capacity as u64,
        scratch: Vec::new(),
    };
    (producer, consumer)
}

impl RingConsumer {
    /// Attaches to an existing file-backed ring created elsewhere.
    pub fn attach<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut region = SharedRegionMut::open_rw(path)?;
        let base = region.as_mut_ptr();

        // SAFETY: validate() below confirms the file actually holds a ring
        // header before any payload access happens.
        let header = unsafe { &*(base as *const RingHeader) };
        header
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let capacity = header.capacity;

        let data = unsafe { (base as *const u8).add(size_of::<RingHeader>()) };
        Ok(Self {
            _region: Arc::new(region),
            base,
            data,
            mask: capacity - 1,
            capacity,
            scratch: Vec::new(),
        })
    }
}

impl RingProducer {
    #[inline(always)]
    fn header(&self) -> &RingHeader {
        // SAFETY: base points at the header this ring was constructed with.
        unsafe { &*(self.base as *const RingHeader) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Unwritten room right now. One cell stays reserved.
    pub fn free(&self) -> usize {
        let h = self.header().head.load(Ordering::Acquire);
        let t = self.header().tail.load(Ordering::Relaxed);
        free_bytes(h, t, self.capacity) as usize
    }

    /// Total overflow-dropped bytes since creation.
    pub fn dropped_bytes(&self) -> u64 {
        self.header().dropped_bytes.load(Ordering::Relaxed)
    }

    /// Copies `src` into the ring. If `src` exceeds the free space the
    /// oldest unread bytes are dropped first; lost history is preferable to
    /// blocking the serial driver. The outcome reports any drop so the
    /// caller can raise the overflow event.
    pub fn write(&mut self, src: &[u8]) -> WriteOutcome {
        let header = self.header();
        let usable = (self.capacity - 1) as usize;

        // A buffer larger than the whole ring can only ever keep its tail.
        let mut dropped = src.len().saturating_sub(usable) as u64;
        let src = &src[src.len() - src.len().min(usable)..];
        let n = src.len() as u64;

        let t = header.tail.load(Ordering::Relaxed);
        let mut h = header.head.load(Ordering::Acquire);
        loop {
            let free = free_bytes(h, t, self.capacity);
            if free >= n {
                break;
            }
            let need = n - free;
            let new_h = (h + need) & self.mask;
            match header.head.compare_exchange(
                h,
                new_h,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    dropped += need;
                    h = new_h;
                }
                // The consumer advanced head concurrently; recheck, it may
                // have freed enough on its own.
                Err(current) => h = current,
            }
        }

        let idx = pos_to_index(t, self.mask) as usize;
        let first = src.len().min(self.capacity as usize - idx);
        // SAFETY: [idx, idx + first) and [0, rest) lie inside the payload
        // region and inside the free span computed above, which the
        // consumer will not read until tail is published.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.data.add(idx), first);
            ptr::copy_nonoverlapping(src.as_ptr().add(first), self.data, src.len() - first);
        }

        let new_t = (t + n) & self.mask;
        // Release publishes the payload bytes together with the cursor.
        header.tail.store(new_t, Ordering::Release);

        if dropped > 0 {
            header.dropped_bytes.fetch_add(dropped, Ordering::Relaxed);
        }
        WriteOutcome {
            written: src.len(),
            dropped,
        }
    }
}

impl RingConsumer {
    #[inline(always)]
    fn header(&self) -> &RingHeader {
        // SAFETY: base points at a validated header.
        unsafe { &*(self.base as *const RingHeader) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Unread byte count.
    #[inline]
    pub fn used(&self) -> usize {
        let t = self.header().tail.load(Ordering::Acquire);
        let h = self.header().head.load(Ordering::Acquire);
        used_bytes(h, t, self.capacity) as usize
    }

    /// Total overflow-dropped bytes since creation.
    pub fn dropped_bytes(&self) -> u64 {
        self.header().dropped_bytes.load(Ordering::Relaxed)
    }

    /// Returns a contiguous read-only view of `n` bytes at logical offset
    /// `offset` from the read cursor, or `None` when `offset + n` exceeds
    /// the unread span.
    ///
    /// The view is a copied temporary held in a scratch buffer, so it is
    /// contiguous even when the underlying bytes wrap, and it stays stable
    /// while the framer examines it.
    pub fn peek(&mut self, offset: usize, n: usize) -> Option<&[u8]> {
        let header = self.header();
        let t = header.tail.load(Ordering::Acquire);
        let h = header.head.load(Ordering::Acquire);
        let used = used_bytes(h, t, self.capacity) as usize;
        if offset.checked_add(n)? > used {
            return None;
        }

        if self.scratch.len() < n {
            self.scratch.resize(n, 0);
        }
        let start = (h + offset as u64) & self.mask;
        let idx = start as usize;
        let first = n.min(self.capacity as usize - idx);
        // SAFETY: the span [head + offset, head + offset + n) was checked
        // against `used`, so it lies inside published payload; scratch was
        // resized to hold n bytes.
        unsafe {
            ptr::copy_nonoverlapping(self.data.add(idx), self.scratch.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(self.data, self.scratch.as_mut_ptr().add(first), n - first);
        }
        Some(&self.scratch[..n])
    }

    /// Advances the read cursor by up to `n` bytes and returns the actual
    /// count, which is smaller than `n` only on underflow.
    pub fn consume(&mut self, n: usize) -> usize {
        let header = self.header();
        let t = header.tail.load(Ordering::Acquire);
        let mut h = header.head.load(Ordering::Acquire);
        loop {
            let used = used_bytes(h, t, self.capacity);
            let step = used.min(n as u64);
            if step == 0 {
                return 0;
            }
            let new_h = (h + step) & self.mask;
            match header.head.compare_exchange(
                h,
                new_h,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return step as usize,
                // Producer dropped oldest bytes concurrently; those bytes
                // are gone either way, retry from its cursor.
                Err(current) => h = current,
            }
        }
    }
}
