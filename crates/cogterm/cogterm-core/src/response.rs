//! Construction of the 75-byte host reply to a 416-byte debugger frame.
//!
//! The target holds an inter-core serializing lock until this reply
//! arrives, so the control thread sends it immediately after each frame.
//!
//! Reply layout (little-endian throughout):
//!
//! ```text
//! offset size
//!   0     16   changed-byte mask of the 128-byte COG block
//!  16     31   changed-byte mask of the 248-byte HUB block
//!  47     20   five u32 hub-read request slots
//!  67      4   core-break request bitmap
//!  71      4   break/stall command word (0x80000000 = keep running)
//! ```
//!
//! Bit i of mask byte j is set when byte `8*j + i` of the current block
//! differs from the shadow taken after the previous reply.

use crate::control::BreakControl;
use tracing::warn;

pub use crate::control::RequestSlot;

/// Reply length in bytes.
pub const RESPONSE_LEN: usize = 75;

/// Full per-step frame length.
pub const FRAME_LEN: usize = 416;

const COG_BLOCK_LEN: usize = 128;
const HUB_BLOCK_LEN: usize = 248;

/// Frame offsets of the two tracked blocks.
const COG_BLOCK_AT: usize = 40;
const HUB_BLOCK_AT: usize = COG_BLOCK_AT + COG_BLOCK_LEN;

const COG_MASK_AT: usize = 0;
const HUB_MASK_AT: usize = 16;
const REQUESTS_AT: usize = 47;
const COGBRK_AT: usize = 67;
const COMMAND_AT: usize = 71;

/// Snapshot state for one core: the current blocks plus the shadows the
/// next diff runs against. Shadows advance only after a reply was built.
pub struct DebuggerState {
    core: u8,
    cog_block: [u8; COG_BLOCK_LEN],
    hub_block: [u8; HUB_BLOCK_LEN],
    cog_block_old: [u8; COG_BLOCK_LEN],
    hub_block_old: [u8; HUB_BLOCK_LEN],
    frames: u64,
    short_frames: u64,
}

impl DebuggerState {
    pub fn new(core: u8) -> Self {
        Self {
            core,
            cog_block: [0; COG_BLOCK_LEN],
            hub_block: [0; HUB_BLOCK_LEN],
            cog_block_old: [0; COG_BLOCK_LEN],
            hub_block_old: [0; HUB_BLOCK_LEN],
            frames: 0,
            short_frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn short_frames(&self) -> u64 {
        self.short_frames
    }

    /// Ingests one debugger frame and builds the reply. Frames shorter
    /// than 416 bytes (the initial 80-byte status block among them) are
    /// skipped and produce no reply.
    pub fn ingest(&mut self, frame: &[u8], ctl: &BreakControl) -> Option<[u8; RESPONSE_LEN]> {
        if frame.len() < FRAME_LEN {
            self.short_frames += 1;
            warn!(
                core = self.core,
                len = frame.len(),
                "short debugger frame skipped, no reply sent"
            );
            return None;
        }
        self.frames += 1;

        self.cog_block
            .copy_from_slice(&frame[COG_BLOCK_AT..COG_BLOCK_AT + COG_BLOCK_LEN]);
        self.hub_block
            .copy_from_slice(&frame[HUB_BLOCK_AT..HUB_BLOCK_AT + HUB_BLOCK_LEN]);

        let mut out = [0u8; RESPONSE_LEN];
        diff_mask(
            &self.cog_block,
            &self.cog_block_old,
            &mut out[COG_MASK_AT..COG_MASK_AT + COG_BLOCK_LEN / 8],
        );
        diff_mask(
            &self.hub_block,
            &self.hub_block_old,
            &mut out[HUB_MASK_AT..HUB_MASK_AT + HUB_BLOCK_LEN / 8],
        );

        let (requests, command) = ctl.take_requests(self.core);
        for (i, req) in requests.iter().enumerate() {
            let at = REQUESTS_AT + i * 4;
            out[at..at + 4].copy_from_slice(&req.to_le_bytes());
        }
        out[COGBRK_AT..COGBRK_AT + 4].copy_from_slice(&ctl.take_break_bitmap().to_le_bytes());
        out[COMMAND_AT..COMMAND_AT + 4].copy_from_slice(&command.to_le_bytes());

        // The reply is on its way; subsequent diffs run against what the
        // consumer has now seen.
        self.cog_block_old.copy_from_slice(&self.cog_block);
        self.hub_block_old.copy_from_slice(&self.hub_block);

        Some(out)
    }
}

/// One mask bit per block byte: bit i of mask byte j covers block byte
/// `8*j + i`.
fn diff_mask(cur: &[u8], old: &[u8], mask: &mut [u8]) {
    debug_assert_eq!(cur.len(), old.len());
    debug_assert_eq!(mask.len() * 8, cur.len());
    for (i, (c, o)) in cur.iter().zip(old.iter()).enumerate() {
        if c != o {
            mask[i / 8] |= 1 << (i % 8);
        }
    }
}
