//! Per-core break and hub-read request state.
//!
//! Consumers (debugger windows) park their requests here from any thread;
//! the control thread folds them into the next 75-byte reply for the
//! matching core. Request slots are one-shot: building a reply takes them.

use cogbus_events::NUM_CORES;
use std::sync::atomic::{AtomicU32, Ordering};

/// "Keep running" command word.
pub(crate) const CMD_KEEP_RUNNING: u32 = 0x8000_0000;

/// The five hub-read request slots of the reply, in wire order.
#[repr(usize)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestSlot {
    Disassembly = 0,
    PointerA = 1,
    PointerB = 2,
    PointerC = 3,
    HubWindow = 4,
}

pub(crate) const NUM_REQUEST_SLOTS: usize = 5;

#[derive(Default)]
struct CoreControl {
    requests: [AtomicU32; NUM_REQUEST_SLOTS],
    command: AtomicU32,
}

pub struct BreakControl {
    cores: [CoreControl; NUM_CORES],
    /// Bitmap of cores a consumer wants halted.
    cogbrk: AtomicU32,
}

impl Default for BreakControl {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakControl {
    pub fn new() -> Self {
        let cores = std::array::from_fn(|_| CoreControl {
            requests: Default::default(),
            command: AtomicU32::new(CMD_KEEP_RUNNING),
        });
        Self {
            cores,
            cogbrk: AtomicU32::new(0),
        }
    }

    /// Parks a hub-read request for the next reply to `core`.
    pub fn request_hub_read(&self, core: u8, slot: RequestSlot, addr: u32) {
        self.cores[core as usize].requests[slot as usize].store(addr, Ordering::Release);
    }

    /// Sets the break/stall command word for `core`. It stays in force
    /// until changed.
    pub fn set_command(&self, core: u8, word: u32) {
        self.cores[core as usize].command.store(word, Ordering::Release);
    }

    pub fn resume(&self, core: u8) {
        self.set_command(core, CMD_KEEP_RUNNING);
    }

    /// Requests a break on every core in `mask` (bit n = core n).
    pub fn request_break(&self, mask: u32) {
        self.cogbrk.fetch_or(mask, Ordering::AcqRel);
    }

    /// Takes the five request slots for `core` (clearing them) plus the
    /// persistent command word.
    pub(crate) fn take_requests(&self, core: u8) -> ([u32; NUM_REQUEST_SLOTS], u32) {
        let ctl = &self.cores[core as usize];
        let mut requests = [0u32; NUM_REQUEST_SLOTS];
        for (i, slot) in ctl.requests.iter().enumerate() {
            requests[i] = slot.swap(0, Ordering::AcqRel);
        }
        (requests, ctl.command.load(Ordering::Acquire))
    }

    /// Takes (and clears) the core-break bitmap.
    pub(crate) fn take_break_bitmap(&self) -> u32 {
        self.cogbrk.swap(0, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_one_shot() {
        let ctl = BreakControl::new();
        ctl.request_hub_read(3, RequestSlot::Disassembly, 0x1000);
        ctl.request_hub_read(3, RequestSlot::HubWindow, 0x2000);

        let (reqs, cmd) = ctl.take_requests(3);
        assert_eq!(reqs, [0x1000, 0, 0, 0, 0x2000]);
        assert_eq!(cmd, CMD_KEEP_RUNNING);

        let (reqs, _) = ctl.take_requests(3);
        assert_eq!(reqs, [0; 5]);
    }

    #[test]
    fn command_word_persists_until_changed() {
        let ctl = BreakControl::new();
        ctl.set_command(1, 0x0000_0001);
        assert_eq!(ctl.take_requests(1).1, 1);
        assert_eq!(ctl.take_requests(1).1, 1);
        ctl.resume(1);
        assert_eq!(ctl.take_requests(1).1, CMD_KEEP_RUNNING);
    }

    #[test]
    fn break_bitmap_accumulates_and_clears() {
        let ctl = BreakControl::new();
        ctl.request_break(0b0000_0101);
        ctl.request_break(0b0000_1000);
        assert_eq!(ctl.take_break_bitmap(), 0b1101);
        assert_eq!(ctl.take_break_bitmap(), 0);
    }
}
