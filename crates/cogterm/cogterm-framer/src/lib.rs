//! `cogterm-framer`: opportunistic boundary detection for the multiplexed
//! serial stream.
//!
//! The stream interleaves three shapes with no outer framing:
//!
//! - human-readable terminal text, line oriented, including backtick
//!   window commands and `Cog<n>` prefixed core messages
//! - binary protocol packets introduced by a 0xDB sentinel byte
//! - fixed-size per-core status blocks (80 bytes, or the full 416-byte
//!   per-step block)
//!
//! Attachment can happen mid-message, so every classification is a
//! best-effort decision over the bytes currently visible, with byte-wise
//! noise recovery when nothing matches. Classification itself is a pure
//! function over a lookahead window (`classify`); the `Framer` adds the
//! two pieces of state that survive between calls: the pending-garbage
//! accumulator and the sync flag.
//!
//! One call to [`Framer::poll`] yields at most one message. For a fixed
//! input byte sequence the emitted `(tag, payload)` sequence does not
//! depend on how the bytes were chunked on arrival: every rule either
//! emits at a stream position it can decide conclusively, or waits.

mod snapshot;
mod sync;
mod text;

pub use snapshot::{DEBUGGER_FRAME_LEN, SNAPSHOT_LEN, build_snapshot, validate_snapshot};
pub use sync::SyncCell;
pub use text::{EolScan, classify_line, find_eol, is_text_byte, looks_like_text, text_run_len};

use cogbus_events::{MessageTag, SyncSource, SyncStatus};
use cogbus_ring::RingConsumer;
use cogterm_util::now_ns;
use std::sync::Arc;
use tracing::{debug, trace};

/// Largest message the framer will emit: the large-class payload
/// capacity. Longer text runs are split at this bound.
pub const MAX_MESSAGE_LEN: usize = 8_184;

/// A 0xDB header whose payload length exceeds this is noise.
pub const DB_MAX_PAYLOAD: usize = 4_096;

/// Unclassifiable bytes are flushed in chunks of this size.
pub const GARBAGE_FLUSH: usize = 256;

/// Lookahead window handed to the pure classifier.
const LOOKAHEAD: usize = 8_192;

/// One message recognized in place: `length` payload bytes starting
/// `skip` bytes past the read cursor. The caller copies the payload out
/// and then consumes `skip + length` ring bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub tag: MessageTag,
    pub skip: usize,
    pub length: usize,
}

/// Output of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// A typed message whose payload still sits in the ring.
    Frame(Frame),
    /// Noise bytes already removed from the ring, to be surfaced as
    /// degraded terminal output.
    Garbage(Vec<u8>),
}

/// Classifier decision at one stream position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Emit(Frame),
    /// The visible bytes are a plausible message prefix; wait for more.
    NeedMore,
    /// The head byte matches nothing; shift it out.
    Noise,
}

/// Running counters, surfaced through the processor stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub text_lines: u64,
    pub db_packets: u64,
    pub status_blocks: u64,
    pub garbage_bytes: u64,
}

pub struct Framer {
    sync: Arc<SyncCell>,
    pending_sync: Option<SyncStatus>,
    garbage: Vec<u8>,
    stats: FramerStats,
}

impl Framer {
    pub fn new(sync: Arc<SyncCell>) -> Self {
        Self {
            sync,
            pending_sync: None,
            garbage: Vec::new(),
            stats: FramerStats::default(),
        }
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    pub fn synchronized(&self) -> bool {
        self.sync.status().synchronized
    }

    /// Takes the pending sync-status notification, if the last polls
    /// flipped it.
    pub fn take_sync_change(&mut self) -> Option<SyncStatus> {
        self.pending_sync.take()
    }

    /// Classifies the next message in the ring. Returns `None` when the
    /// visible bytes are an incomplete prefix (wait for more input).
    pub fn poll(&mut self, ring: &mut RingConsumer) -> Option<Extract> {
        loop {
            if self.garbage.len() >= GARBAGE_FLUSH {
                return Some(self.flush_garbage());
            }

            let used = ring.used();
            if used == 0 {
                return None;
            }

            let window = used.min(LOOKAHEAD);
            let decision = {
                let look = ring.peek(0, window)?;
                classify(look, used)
            };

            match decision {
                Decision::Emit(frame) => {
                    if !self.garbage.is_empty() {
                        // Surface accumulated noise first; the frame is
                        // re-derived on the next poll from the untouched
                        // ring bytes.
                        return Some(self.flush_garbage());
                    }
                    self.note_emit(&frame);
                    return Some(Extract::Frame(frame));
                }
                Decision::NeedMore => return None,
                Decision::Noise => {
                    let b = ring.peek(0, 1)?[0];
                    ring.consume(1);
                    self.garbage.push(b);
                    self.stats.garbage_bytes += 1;
                }
            }
        }
    }

    fn flush_garbage(&mut self) -> Extract {
        trace!(bytes = self.garbage.len(), "flushing unclassifiable bytes");
        Extract::Garbage(std::mem::take(&mut self.garbage))
    }

    fn note_emit(&mut self, frame: &Frame) {
        let source = match frame.tag {
            MessageTag::DbPacket => {
                self.stats.db_packets += 1;
                SyncSource::DbFrame
            }
            tag if tag.is_debugger() => {
                self.stats.status_blocks += 1;
                SyncSource::Snapshot
            }
            _ => {
                self.stats.text_lines += 1;
                SyncSource::TextLine
            }
        };
        if self.sync.mark(source, now_ns()) {
            let status = self.sync.status();
            debug!(source = ?status.source, "stream synchronized");
            self.pending_sync = Some(status);
        }
    }
}

/// Byte values that plausibly begin the next message: text, the 0xDB
/// sentinel, or a core index opening another status block.
#[inline]
fn plausible_boundary(b: u8) -> bool {
    is_text_byte(b) || b == 0xDB || b <= 7
}

/// The classification rules, in order, at one stream position.
///
/// `look` is a prefix of the unread bytes (up to the lookahead window);
/// `used` is the total unread count. Decisions must depend only on stream
/// content at this position, never on arrival chunking: anything
/// inconclusive is `NeedMore`.
fn classify(look: &[u8], used: usize) -> Decision {
    // Rule 1: text lookahead.
    if looks_like_text(look) {
        let run = text_run_len(look);
        if run > 0 {
            let run_is_edge = run == look.len() && run == used;
            match find_eol(&look[..run], run_is_edge) {
                EolScan::Line(len) => {
                    if len <= MAX_MESSAGE_LEN {
                        return Decision::Emit(Frame {
                            tag: classify_line(&look[..len]),
                            skip: 0,
                            length: len,
                        });
                    }
                    // Oversized line: split below the slot bound.
                    return Decision::Emit(Frame {
                        tag: MessageTag::TerminalOutput,
                        skip: 0,
                        length: MAX_MESSAGE_LEN,
                    });
                }
                EolScan::Pending => return Decision::NeedMore,
                EolScan::None => {
                    if run >= MAX_MESSAGE_LEN {
                        return Decision::Emit(Frame {
                            tag: MessageTag::TerminalOutput,
                            skip: 0,
                            length: MAX_MESSAGE_LEN,
                        });
                    }
                    if run == used {
                        // Unterminated text up to the edge of the data.
                        return Decision::NeedMore;
                    }
                    // Text run interrupted by a binary byte before any
                    // terminator: not a line. Shift bytes until a later
                    // rule can engage.
                }
            }
        }
    }

    // Rule 2: 0xDB protocol frame.
    if look[0] == 0xDB {
        if used < 4 {
            return Decision::NeedMore;
        }
        let subtype = look[1];
        let payload_len = u16::from_le_bytes([look[2], look[3]]) as usize;
        if payload_len > DB_MAX_PAYLOAD {
            debug!(subtype, payload_len, "0xDB header with absurd length, treating as noise");
            return Decision::Noise;
        }
        if used < 4 + payload_len {
            return Decision::NeedMore;
        }
        trace!(subtype, payload_len, "protocol frame");
        return Decision::Emit(Frame {
            tag: MessageTag::DbPacket,
            skip: 4,
            length: payload_len,
        });
    }

    // Rule 3: per-core status block.
    if look[0] <= 7 {
        if used < SNAPSHOT_LEN {
            return Decision::NeedMore;
        }
        if let Some(core) = validate_snapshot(&look[..SNAPSHOT_LEN]) {
            if used == SNAPSHOT_LEN || plausible_boundary(look[SNAPSHOT_LEN]) {
                return Decision::Emit(Frame {
                    tag: MessageTag::debugger(core),
                    skip: 0,
                    length: SNAPSHOT_LEN,
                });
            }
            // The block continues as binary: try the full per-step frame.
            if used < DEBUGGER_FRAME_LEN {
                return Decision::NeedMore;
            }
            if used == DEBUGGER_FRAME_LEN || plausible_boundary(look[DEBUGGER_FRAME_LEN]) {
                return Decision::Emit(Frame {
                    tag: MessageTag::debugger(core),
                    skip: 0,
                    length: DEBUGGER_FRAME_LEN,
                });
            }
        }
    }

    // Rule 4: nothing matches at this position.
    Decision::Noise
}
