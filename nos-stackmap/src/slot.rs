//! Ring slot descriptor

use static_assertions::assert_eq_size;

use crate::types::{BufIdx, ConnId, NULL_BUF};

bitflags::bitflags! {
    /// Per-slot flags shared with the ring owner
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SlotFlags: u16 {
        /// The buffer index in the slot was replaced
        const BUF_CHANGED = 0x0001;
        /// Ask for a notification when the slot is consumed
        const REPORT = 0x0002;
        /// Pass the packet to the other endpoint
        const FORWARD = 0x0004;
        /// Packet continues in the next slot
        const MOREFRAG = 0x0020;
    }
}

/// A position in a ring.
///
/// Slots never own a buffer across sync calls: the buffer index is swapped
/// with other slots, never copied, so each buffer index lives in exactly one
/// slot at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Slot {
    /// Buffer index
    pub buf_idx: BufIdx,
    /// Packet length
    pub len: u16,
    /// Slot flags
    pub flags: SlotFlags,
    /// Payload offset inside the buffer
    pub offset: u16,
    /// Connection identity
    pub conn: ConnId,
}

assert_eq_size!(Slot, [u64; 2]);

impl Slot {
    pub fn new(buf_idx: BufIdx) -> Self {
        Self {
            buf_idx,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_buffer(&self) -> bool {
        self.buf_idx != NULL_BUF
    }

    /// Drop packet metadata, keeping the buffer
    pub fn clear(&mut self) {
        self.len = 0;
        self.offset = 0;
        self.conn = 0;
    }

    pub fn mark_changed(&mut self) {
        self.flags |= SlotFlags::BUF_CHANGED;
    }
}
