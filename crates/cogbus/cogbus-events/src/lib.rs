#![forbid(unsafe_code)]

//! Shared event and tag definitions for the cogterm pipeline.
//!
//! Everything here is plain old data. These types cross thread boundaries
//! (worker, router, control thread) and the tag byte is stored verbatim in
//! pool slot headers, so the wire encoding is fixed and tested below.

pub mod flags {
    //! Bit assignments for the slot-header flags byte.

    /// Message was salvaged from unclassifiable bytes (low confidence).
    pub const DEGRADED: u8 = 1 << 0;
}

/// Number of cores on the target MCU.
pub const NUM_CORES: usize = 8;

/// Kinds of backtick-prefixed window command lines.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BacktickKind {
    Logic,
    Scope,
    ScopeXy,
    Fft,
    Spectro,
    Plot,
    Term,
    Bitmap,
    Midi,
    Update,
}

impl BacktickKind {
    pub const ALL: [BacktickKind; 10] = [
        BacktickKind::Logic,
        BacktickKind::Scope,
        BacktickKind::ScopeXy,
        BacktickKind::Fft,
        BacktickKind::Spectro,
        BacktickKind::Plot,
        BacktickKind::Term,
        BacktickKind::Bitmap,
        BacktickKind::Midi,
        BacktickKind::Update,
    ];

    /// Matches the leading word of a backtick line (the bytes after the
    /// backtick, up to the first space/EOL). Case sensitive, as emitted by
    /// the target firmware.
    pub fn from_word(word: &[u8]) -> Option<Self> {
        Some(match word {
            b"LOGIC" => BacktickKind::Logic,
            b"SCOPE" => BacktickKind::Scope,
            b"SCOPE_XY" => BacktickKind::ScopeXy,
            b"FFT" => BacktickKind::Fft,
            b"SPECTRO" => BacktickKind::Spectro,
            b"PLOT" => BacktickKind::Plot,
            b"TERM" => BacktickKind::Term,
            b"BITMAP" => BacktickKind::Bitmap,
            b"MIDI" => BacktickKind::Midi,
            b"UPDATE" => BacktickKind::Update,
            _ => return None,
        })
    }
}

/// Single-byte message tag stored in every pool slot header.
///
/// Wire values are stable: cog text messages occupy 1..=8 and per-core
/// debugger status blocks occupy 9..=16, so the core index is recoverable
/// from the tag byte alone without touching the payload.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageTag {
    DbPacket = 0,
    CogMessage0 = 1,
    CogMessage1 = 2,
    CogMessage2 = 3,
    CogMessage3 = 4,
    CogMessage4 = 5,
    CogMessage5 = 6,
    CogMessage6 = 7,
    CogMessage7 = 8,
    Debugger0 = 9,
    Debugger1 = 10,
    Debugger2 = 11,
    Debugger3 = 12,
    Debugger4 = 13,
    Debugger5 = 14,
    Debugger6 = 15,
    Debugger7 = 16,
    P2SystemInit = 17,
    BacktickLogic = 18,
    BacktickScope = 19,
    BacktickScopeXy = 20,
    BacktickFft = 21,
    BacktickSpectro = 22,
    BacktickPlot = 23,
    BacktickTerm = 24,
    BacktickBitmap = 25,
    BacktickMidi = 26,
    BacktickUpdate = 27,
    TerminalOutput = 28,
    InvalidCog = 29,
}

impl MessageTag {
    /// Highest valid wire value, used for table sizing and validation.
    pub const MAX_WIRE: u8 = MessageTag::InvalidCog as u8;

    #[inline]
    pub fn wire(self) -> u8 {
        self as u8
    }

    /// Decodes a tag byte read back from a slot header.
    pub fn from_wire(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => MessageTag::DbPacket,
            1..=8 => Self::cog_message(raw - 1),
            9..=16 => Self::debugger(raw - 9),
            17 => MessageTag::P2SystemInit,
            18 => MessageTag::BacktickLogic,
            19 => MessageTag::BacktickScope,
            20 => MessageTag::BacktickScopeXy,
            21 => MessageTag::BacktickFft,
            22 => MessageTag::BacktickSpectro,
            23 => MessageTag::BacktickPlot,
            24 => MessageTag::BacktickTerm,
            25 => MessageTag::BacktickBitmap,
            26 => MessageTag::BacktickMidi,
            27 => MessageTag::BacktickUpdate,
            28 => MessageTag::TerminalOutput,
            29 => MessageTag::InvalidCog,
            _ => return None,
        })
    }

    /// Tag for a `Cog<n>` text line. `core` must be < 8.
    #[inline]
    pub fn cog_message(core: u8) -> Self {
        debug_assert!(core < NUM_CORES as u8);
        match core {
            0 => MessageTag::CogMessage0,
            1 => MessageTag::CogMessage1,
            2 => MessageTag::CogMessage2,
            3 => MessageTag::CogMessage3,
            4 => MessageTag::CogMessage4,
            5 => MessageTag::CogMessage5,
            6 => MessageTag::CogMessage6,
            _ => MessageTag::CogMessage7,
        }
    }

    /// Tag for a per-core debugger status block. `core` must be < 8.
    #[inline]
    pub fn debugger(core: u8) -> Self {
        debug_assert!(core < NUM_CORES as u8);
        match core {
            0 => MessageTag::Debugger0,
            1 => MessageTag::Debugger1,
            2 => MessageTag::Debugger2,
            3 => MessageTag::Debugger3,
            4 => MessageTag::Debugger4,
            5 => MessageTag::Debugger5,
            6 => MessageTag::Debugger6,
            _ => MessageTag::Debugger7,
        }
    }

    pub fn backtick(kind: BacktickKind) -> Self {
        match kind {
            BacktickKind::Logic => MessageTag::BacktickLogic,
            BacktickKind::Scope => MessageTag::BacktickScope,
            BacktickKind::ScopeXy => MessageTag::BacktickScopeXy,
            BacktickKind::Fft => MessageTag::BacktickFft,
            BacktickKind::Spectro => MessageTag::BacktickSpectro,
            BacktickKind::Plot => MessageTag::BacktickPlot,
            BacktickKind::Term => MessageTag::BacktickTerm,
            BacktickKind::Bitmap => MessageTag::BacktickBitmap,
            BacktickKind::Midi => MessageTag::BacktickMidi,
            BacktickKind::Update => MessageTag::BacktickUpdate,
        }
    }

    /// Core index for tags that embed one (cog messages and debugger
    /// blocks), `None` otherwise.
    #[inline]
    pub fn cog_index(self) -> Option<u8> {
        let raw = self.wire();
        match raw {
            1..=8 => Some(raw - 1),
            9..=16 => Some(raw - 9),
            _ => None,
        }
    }

    #[inline]
    pub fn is_debugger(self) -> bool {
        matches!(self.wire(), 9..=16)
    }

    #[inline]
    pub fn is_cog_message(self) -> bool {
        matches!(self.wire(), 1..=8)
    }

    #[inline]
    pub fn is_backtick(self) -> bool {
        matches!(self.wire(), 18..=27)
    }
}

/// Which control line produced a reset marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetKind {
    Dtr,
    Rts,
}

/// One hardware reset boundary marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetEvent {
    pub kind: ResetKind,
    /// Monotonic nanoseconds at observation.
    pub timestamp_ns: u64,
    /// Monotonically increasing per-session marker number.
    pub sequence: u64,
}

/// What flipped the framer into the synchronized state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncSource {
    TextLine,
    DbFrame,
    Snapshot,
    Dtr,
    Rts,
}

impl From<ResetKind> for SyncSource {
    fn from(kind: ResetKind) -> Self {
        match kind {
            ResetKind::Dtr => SyncSource::Dtr,
            ResetKind::Rts => SyncSource::Rts,
        }
    }
}

/// Snapshot of the framer's boundary-lock belief. Informational only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncStatus {
    pub synchronized: bool,
    pub source: Option<SyncSource>,
    /// Monotonic nanoseconds of the last transition.
    pub since_ns: u64,
}

impl SyncStatus {
    pub fn unsynchronized() -> Self {
        Self {
            synchronized: false,
            source: None,
            since_ns: 0,
        }
    }
}

/// Stable kind tag for routing-stage failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingErrorKind {
    PoolExhausted,
    SignalFull,
    DestinationFailed,
    DestinationGone,
}

impl RoutingErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingErrorKind::PoolExhausted => "pool_exhausted",
            RoutingErrorKind::SignalFull => "signal_full",
            RoutingErrorKind::DestinationFailed => "destination_failed",
            RoutingErrorKind::DestinationGone => "destination_gone",
        }
    }
}

/// Events surfaced on the processor's event sink.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// Ring overflow dropped this many of the oldest unread bytes.
    BufferOverflow { dropped_bytes: u64 },
    ResetDetected(ResetEvent),
    /// External recorders should rotate their output now.
    RotateLog { sequence: u64 },
    /// A full 416-byte debugger frame arrived for this core.
    DebuggerPacketReceived { core: u8 },
    P2SystemReboot,
    RoutingError {
        kind: RoutingErrorKind,
        detail: String,
    },
    SyncStatusChanged(SyncStatus),
    /// Router drain did not finish within the timeout.
    DrainTimeout { in_flight: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn tag_is_one_byte() {
        assert_eq!(size_of::<MessageTag>(), 1);
    }

    #[test]
    fn tag_wire_roundtrip() {
        for raw in 0..=MessageTag::MAX_WIRE {
            let tag = MessageTag::from_wire(raw).expect("valid wire value");
            assert_eq!(tag.wire(), raw);
        }
        assert!(MessageTag::from_wire(MessageTag::MAX_WIRE + 1).is_none());
        assert!(MessageTag::from_wire(0xFF).is_none());
    }

    #[test]
    fn cog_index_embedding() {
        for core in 0..NUM_CORES as u8 {
            assert_eq!(MessageTag::cog_message(core).cog_index(), Some(core));
            assert_eq!(MessageTag::debugger(core).cog_index(), Some(core));
            assert!(MessageTag::cog_message(core).is_cog_message());
            assert!(MessageTag::debugger(core).is_debugger());
        }
        assert_eq!(MessageTag::TerminalOutput.cog_index(), None);
        assert_eq!(MessageTag::DbPacket.cog_index(), None);
    }

    #[test]
    fn backtick_words_map_to_tags() {
        assert_eq!(BacktickKind::from_word(b"PLOT"), Some(BacktickKind::Plot));
        assert_eq!(
            BacktickKind::from_word(b"SCOPE_XY"),
            Some(BacktickKind::ScopeXy)
        );
        assert_eq!(BacktickKind::from_word(b"plot"), None);
        assert_eq!(BacktickKind::from_word(b""), None);
        for kind in BacktickKind::ALL {
            assert!(MessageTag::backtick(kind).is_backtick());
        }
    }
}
