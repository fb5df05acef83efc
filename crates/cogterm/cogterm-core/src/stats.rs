//! Serializable snapshots of pipeline health, assembled by
//! `Processor::stats`.

use crate::reset::ResetStats;
use crate::router::RouterStats;
use cogbus_events::ResetKind;
use cogbus_pool::PoolStats;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared hot-path counters. The worker and receive path write them;
/// `stats()` reads.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub bytes_received: AtomicU64,
    pub messages_published: AtomicU64,
    pub pool_drops: AtomicU64,
    pub signal_drops: AtomicU64,
    pub text_lines: AtomicU64,
    pub db_packets: AtomicU64,
    pub status_blocks: AtomicU64,
    pub garbage_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PoolUsage {
    pub small_in_use: u64,
    pub large_in_use: u64,
    pub small_overflow: u64,
    pub large_overflow: u64,
    pub poisoned: u64,
}

impl From<PoolStats> for PoolUsage {
    fn from(s: PoolStats) -> Self {
        Self {
            small_in_use: s.small_in_use,
            large_in_use: s.large_in_use,
            small_overflow: s.small_overflow,
            large_overflow: s.large_overflow,
            poisoned: s.poisoned,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RouterSnapshot {
    pub routed: u64,
    pub no_destination: u64,
    pub delivery_errors: u64,
    pub in_flight: u64,
}

impl From<RouterStats> for RouterSnapshot {
    fn from(s: RouterStats) -> Self {
        Self {
            routed: s.routed,
            no_destination: s.no_destination,
            delivery_errors: s.delivery_errors,
            in_flight: s.in_flight,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResetSnapshot {
    pub total: u64,
    pub history_len: usize,
    pub last_kind: Option<String>,
    pub last_sequence: Option<u64>,
}

impl From<ResetStats> for ResetSnapshot {
    fn from(s: ResetStats) -> Self {
        Self {
            total: s.total,
            history_len: s.history_len,
            last_kind: s.last.map(|e| {
                match e.kind {
                    ResetKind::Dtr => "DTR",
                    ResetKind::Rts => "RTS",
                }
                .to_string()
            }),
            last_sequence: s.last.map(|e| e.sequence),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PerformanceStats {
    pub bytes_received: u64,
    pub messages_published: u64,
    pub text_lines: u64,
    pub db_packets: u64,
    pub status_blocks: u64,
    pub garbage_bytes: u64,
    pub pool_drops: u64,
    pub signal_drops: u64,
    pub ring_dropped_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStats {
    pub pool: PoolUsage,
    pub router: RouterSnapshot,
    pub reset: ResetSnapshot,
    pub uptime_secs: u64,
    pub performance: PerformanceStats,
}

impl PipelineCounters {
    pub(crate) fn performance(&self, ring_dropped_bytes: u64) -> PerformanceStats {
        PerformanceStats {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            text_lines: self.text_lines.load(Ordering::Relaxed),
            db_packets: self.db_packets.load(Ordering::Relaxed),
            status_blocks: self.status_blocks.load(Ordering::Relaxed),
            garbage_bytes: self.garbage_bytes.load(Ordering::Relaxed),
            pool_drops: self.pool_drops.load(Ordering::Relaxed),
            signal_drops: self.signal_drops.load(Ordering::Relaxed),
            ring_dropped_bytes,
        }
    }
}
