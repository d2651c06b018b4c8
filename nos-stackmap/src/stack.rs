//! Host protocol stack contract
//!
//! The engine hands every claimed buffer to the stack synchronously and acts
//! on the verdict. The stack signals the release of a buffer it kept through
//! [`BufferArena::release`](crate::cb::BufferArena::release).

use crate::error::Result;
use crate::slot::Slot;
use crate::types::{BufIdx, ConnId};

/// Packet view passed to the host stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPacket {
    /// Buffer holding the packet
    pub buf_idx: BufIdx,
    /// Bridge index of the port the packet came from
    pub port: u16,
    /// Packet length
    pub len: u16,
    /// Payload offset
    pub offset: u16,
    /// Connection the packet belongs to; the stack may rewrite it
    pub conn: ConnId,
}

impl StackPacket {
    pub fn from_slot(port: u16, slot: &Slot) -> Self {
        Self {
            buf_idx: slot.buf_idx,
            port,
            len: slot.len,
            offset: slot.offset,
            conn: slot.conn,
        }
    }

    /// Copy back what the stack may have changed
    pub(crate) fn write_back(&self, slot: &mut Slot) {
        slot.len = self.len;
        slot.offset = self.offset;
        slot.conn = self.conn;
    }
}

/// What the stack did with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackVerdict {
    /// Deliver the buffer to the queue of `conn`
    Forward,
    /// The stack is done with the data; the slot can be reused
    Consumed,
    /// The stack keeps a reference; the buffer must leave the ring until the
    /// stack releases it
    Reserved,
}

/// Send/receive primitives of the host stack.
///
/// An `Err` means the stack cannot take the packet now: the engine stops
/// scanning and retries the same slot on the next sync.
pub trait HostStack: Send + Sync {
    /// Transmit path: packet from the stack port towards a NIC
    fn send(&self, pkt: &mut StackPacket) -> Result<StackVerdict>;

    /// Receive path: packet from a NIC towards the stack port
    fn recv(&self, pkt: &mut StackPacket) -> Result<StackVerdict>;
}

/// Stack that forwards every packet unchanged on its stamped connection
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughStack;

impl HostStack for PassthroughStack {
    fn send(&self, _pkt: &mut StackPacket) -> Result<StackVerdict> {
        Ok(StackVerdict::Forward)
    }

    fn recv(&self, _pkt: &mut StackPacket) -> Result<StackVerdict> {
        Ok(StackVerdict::Forward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_round_trip_through_slot() {
        let mut slot = Slot {
            buf_idx: 12,
            len: 60,
            offset: 0,
            conn: 5,
            ..Slot::default()
        };
        let mut pkt = StackPacket::from_slot(2, &slot);
        assert_eq!(pkt.buf_idx, 12);
        assert_eq!(pkt.port, 2);
        pkt.conn = 9;
        pkt.offset = 66;
        pkt.write_back(&mut slot);
        assert_eq!(slot.conn, 9);
        assert_eq!(slot.offset, 66);
        assert_eq!(slot.buf_idx, 12);
    }

    #[test]
    fn test_passthrough() {
        let mut pkt = StackPacket::from_slot(0, &Slot::new(3));
        assert_eq!(PassthroughStack.send(&mut pkt), Ok(StackVerdict::Forward));
        assert_eq!(PassthroughStack.recv(&mut pkt), Ok(StackVerdict::Forward));
    }
}
