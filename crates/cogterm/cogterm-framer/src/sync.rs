//! Shared synchronization-state cell.
//!
//! The framer flips it on the first recognized message, the reset manager
//! on a control-line transition, and the processor clears it on ring
//! overflow. Readers take a consistent snapshot without locking.

use cogbus_events::{SyncSource, SyncStatus};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

const SRC_NONE: u8 = 0;
const SRC_TEXT: u8 = 1;
const SRC_DB: u8 = 2;
const SRC_SNAPSHOT: u8 = 3;
const SRC_DTR: u8 = 4;
const SRC_RTS: u8 = 5;

fn encode(source: SyncSource) -> u8 {
    match source {
        SyncSource::TextLine => SRC_TEXT,
        SyncSource::DbFrame => SRC_DB,
        SyncSource::Snapshot => SRC_SNAPSHOT,
        SyncSource::Dtr => SRC_DTR,
        SyncSource::Rts => SRC_RTS,
    }
}

fn decode(raw: u8) -> Option<SyncSource> {
    Some(match raw {
        SRC_TEXT => SyncSource::TextLine,
        SRC_DB => SyncSource::DbFrame,
        SRC_SNAPSHOT => SyncSource::Snapshot,
        SRC_DTR => SyncSource::Dtr,
        SRC_RTS => SyncSource::Rts,
        _ => return None,
    })
}

#[derive(Debug, Default)]
pub struct SyncCell {
    synchronized: AtomicBool,
    source: AtomicU8,
    since_ns: AtomicU64,
}

impl SyncCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the stream synchronized from `source`. Returns `true` when
    /// this call changed the state (off to on, or a new source while on,
    /// as a reset does).
    pub fn mark(&self, source: SyncSource, now_ns: u64) -> bool {
        let was = self.synchronized.swap(true, Ordering::AcqRel);
        let prev_src = self.source.swap(encode(source), Ordering::AcqRel);
        if !was || prev_src != encode(source) {
            self.since_ns.store(now_ns, Ordering::Release);
            return true;
        }
        false
    }

    /// Drops synchronization (ring overflow). Returns `true` when the
    /// state actually changed.
    pub fn clear(&self, now_ns: u64) -> bool {
        let was = self.synchronized.swap(false, Ordering::AcqRel);
        if was {
            self.source.store(SRC_NONE, Ordering::Release);
            self.since_ns.store(now_ns, Ordering::Release);
        }
        was
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            synchronized: self.synchronized.load(Ordering::Acquire),
            source: decode(self.source.load(Ordering::Acquire)),
            since_ns: self.since_ns.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_clear_report_edges() {
        let cell = SyncCell::new();
        assert!(!cell.status().synchronized);

        assert!(cell.mark(SyncSource::TextLine, 10));
        let s = cell.status();
        assert!(s.synchronized);
        assert_eq!(s.source, Some(SyncSource::TextLine));
        assert_eq!(s.since_ns, 10);

        // Same source again is not an edge.
        assert!(!cell.mark(SyncSource::TextLine, 20));
        // A reset re-sources the sync even while already synchronized.
        assert!(cell.mark(SyncSource::Dtr, 30));
        assert_eq!(cell.status().source, Some(SyncSource::Dtr));

        assert!(cell.clear(40));
        assert!(!cell.clear(50));
        assert_eq!(cell.status().source, None);
    }
}
