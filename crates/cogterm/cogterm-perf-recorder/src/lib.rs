//! Stage latency recorder for the ingestion hot paths.
//!
//! Elapsed times land in power-of-two histogram buckets, one histogram
//! per stage, with running count/total/min/max on the side. The whole
//! recorder is a flat in-place array: no heap, no pending state between
//! calls, and summaries (mean plus approximate p50/p99 from the buckets)
//! can be read at any time without draining anything.
//!
//! When the `record` feature is **off** (production default),
//! `PerfRecorder` is a zero-sized type, `observe` is an
//! `#[inline(always)]` no-op and `time` just runs its closure.

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PerfStage {
    Classify = 0,
    AcquireSlot = 1,
    FillSlot = 2,
    PublishSignal = 3,
    RouteLookup = 4,
    Deliver = 5,
    BuildResponse = 6,
    WorkerTotal = 7,
    RouterTotal = 8,
}

pub const NUM_STAGES: usize = 9;

/// Bucket i covers `[2^i, 2^(i+1))` nanoseconds; the last bucket absorbs
/// everything above (2^39 ns is ~9 minutes, far past any stage).
pub const NUM_BUCKETS: usize = 40;

/// Point-in-time digest of one stage. Identical in both feature modes so
/// callers never need their own cfg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: PerfStage,
    pub count: u64,
    pub total_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: u64,
    pub p50_ns: u64,
    pub p99_ns: u64,
}

impl StageSummary {
    pub fn empty(stage: PerfStage) -> Self {
        Self {
            stage,
            count: 0,
            total_ns: 0,
            min_ns: 0,
            max_ns: 0,
            mean_ns: 0,
            p50_ns: 0,
            p99_ns: 0,
        }
    }
}

// ─── Feature: record ON ─────────────────────────────────────────────────────

#[cfg(feature = "record")]
mod inner {
    use super::*;

    #[inline(always)]
    pub fn now_ns() -> u64 {
        cogterm_util::now_ns()
    }

    #[derive(Clone, Copy)]
    struct StageHist {
        buckets: [u32; NUM_BUCKETS],
        count: u64,
        total_ns: u64,
        min_ns: u64,
        max_ns: u64,
    }

    impl StageHist {
        const EMPTY: Self = Self {
            buckets: [0; NUM_BUCKETS],
            count: 0,
            total_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
        };

        #[inline(always)]
        fn bucket_of(ns: u64) -> usize {
            if ns == 0 {
                return 0;
            }
            // floor(log2), clamped into the table.
            ((63 - ns.leading_zeros()) as usize).min(NUM_BUCKETS - 1)
        }

        #[inline(always)]
        fn observe(&mut self, ns: u64) {
            self.buckets[Self::bucket_of(ns)] += 1;
            self.count += 1;
            self.total_ns = self.total_ns.saturating_add(ns);
            self.min_ns = self.min_ns.min(ns);
            self.max_ns = self.max_ns.max(ns);
        }

        /// Approximate quantile: walk the buckets to the requested rank
        /// and report that bucket's midpoint, clamped to the observed
        /// range so tiny sample counts stay sane.
        fn quantile(&self, q: f64) -> u64 {
            if self.count == 0 {
                return 0;
            }
            let rank = ((self.count as f64) * q).ceil().max(1.0) as u64;
            let mut seen = 0u64;
            for (idx, &n) in self.buckets.iter().enumerate() {
                seen += n as u64;
                if seen >= rank {
                    let mid = (1u64 << idx) + (1u64 << idx) / 2;
                    return mid.clamp(self.min_ns, self.max_ns);
                }
            }
            self.max_ns
        }
    }

    pub struct PerfRecorder {
        stages: [StageHist; NUM_STAGES],
    }

    impl PerfRecorder {
        pub fn new() -> Self {
            Self {
                stages: [StageHist::EMPTY; NUM_STAGES],
            }
        }

        #[inline(always)]
        pub fn observe(&mut self, stage: PerfStage, elapsed_ns: u64) {
            self.stages[stage as usize].observe(elapsed_ns);
        }

        /// Times one operation and records it under `stage`.
        #[inline(always)]
        pub fn time<T>(&mut self, stage: PerfStage, op: impl FnOnce() -> T) -> T {
            let started = now_ns();
            let out = op();
            self.observe(stage, now_ns().saturating_sub(started));
            out
        }

        pub fn count(&self, stage: PerfStage) -> u64 {
            self.stages[stage as usize].count
        }

        pub fn summary(&self, stage: PerfStage) -> StageSummary {
            let h = &self.stages[stage as usize];
            if h.count == 0 {
                return StageSummary::empty(stage);
            }
            StageSummary {
                stage,
                count: h.count,
                total_ns: h.total_ns,
                min_ns: h.min_ns,
                max_ns: h.max_ns,
                mean_ns: h.total_ns / h.count,
                p50_ns: h.quantile(0.50),
                p99_ns: h.quantile(0.99),
            }
        }

        pub fn clear(&mut self) {
            self.stages = [StageHist::EMPTY; NUM_STAGES];
        }
    }

    impl Default for PerfRecorder {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ─── Feature: record OFF (zero-cost stubs) ──────────────────────────────────

#[cfg(not(feature = "record"))]
mod inner {
    use super::*;

    #[inline(always)]
    pub fn now_ns() -> u64 {
        0
    }

    pub struct PerfRecorder;

    impl PerfRecorder {
        #[inline(always)]
        pub fn new() -> Self {
            Self
        }
        #[inline(always)]
        pub fn observe(&mut self, _stage: PerfStage, _elapsed_ns: u64) {}
        #[inline(always)]
        pub fn time<T>(&mut self, _stage: PerfStage, op: impl FnOnce() -> T) -> T {
            op()
        }
        #[inline(always)]
        pub fn count(&self, _stage: PerfStage) -> u64 {
            0
        }
        #[inline(always)]
        pub fn summary(&self, stage: PerfStage) -> StageSummary {
            StageSummary::empty(stage)
        }
        #[inline(always)]
        pub fn clear(&mut self) {}
    }

    impl Default for PerfRecorder {
        fn default() -> Self {
            Self
        }
    }
}

pub use inner::{PerfRecorder, now_ns};
