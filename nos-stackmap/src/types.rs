//! Identifiers and constants shared by the stackmap components

use static_assertions::const_assert;

/// Index of a buffer in the [`BufferArena`](crate::cb::BufferArena)
pub type BufIdx = u32;

/// Connection identity stamped on a slot (a socket descriptor)
pub type ConnId = u32;

/// Null buffer index; also terminates forwarding lists
pub const NULL_BUF: BufIdx = 0;

/// First buffer index usable for packets; 0 and 1 are reserved
pub const FIRST_BUF: BufIdx = 2;

/// Maximum number of ports on a bridge
pub const NM_BDG_MAXPORTS: usize = 254;

/// Maximum number of rings per port
pub const NM_BDG_MAXRINGS: usize = 16;

/// Maximum number of packets moved in one bridge batch
pub const NM_BDG_BATCH_MAX: usize = 1024;

/// Number of connection queues in a forwarding table
pub const FT_QUEUES: usize = NM_BDG_BATCH_MAX * 4;

/// Connection id that collects all traffic originated by the host port
pub const CONN_HOST: ConnId = (NM_BDG_MAXPORTS * NM_BDG_MAXRINGS - 1) as ConnId;

const_assert!((CONN_HOST as usize) < FT_QUEUES);
const_assert!(NULL_BUF < FIRST_BUF);

/// Which ring array a ring belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RingKind {
    /// Virtual port transmit ring (flush source)
    Tx = 0,
    /// Virtual port receive ring (flush destination)
    Rx = 1,
    /// Hardware transmit ring of a NIC
    HwTx = 2,
    /// Hardware receive ring of a NIC
    HwRx = 3,
    /// Reserve pool slots
    Extra = 4,
}

impl RingKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RingKind::Tx),
            1 => Some(RingKind::Rx),
            2 => Some(RingKind::HwTx),
            3 => Some(RingKind::HwRx),
            4 => Some(RingKind::Extra),
            _ => None,
        }
    }

    /// True for the transmit side, virtual or hardware
    pub fn is_tx(self) -> bool {
        matches!(self, RingKind::Tx | RingKind::HwTx)
    }
}

/// Identity of a ring: owning port, ring array and position in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingId {
    pub port: u16,
    pub kind: RingKind,
    pub index: u16,
}

impl RingId {
    pub const fn new(port: u16, kind: RingKind, index: u16) -> Self {
        Self { port, kind, index }
    }
}

/// Weak back-reference from a control block to the slot holding its buffer.
///
/// This is a lookup key, not an ownership relation: the slot content may be
/// swapped away at any time and users must re-check it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub ring: RingId,
    pub slot: u32,
}

/// Encoding reserved for "no slot"
pub(crate) const SLOT_REF_NONE: u64 = u64::MAX;

impl SlotRef {
    pub const fn new(ring: RingId, slot: u32) -> Self {
        Self { ring, slot }
    }

    /// Pack into a single word: port:16 | kind:8 | index:8 | slot:32
    pub(crate) fn encode(self) -> u64 {
        ((self.ring.port as u64) << 48)
            | ((self.ring.kind as u64) << 40)
            | (((self.ring.index & 0xff) as u64) << 32)
            | self.slot as u64
    }

    pub(crate) fn decode(raw: u64) -> Option<Self> {
        if raw == SLOT_REF_NONE {
            return None;
        }
        let kind = RingKind::from_u8(((raw >> 40) & 0xff) as u8)?;
        Some(Self {
            ring: RingId {
                port: (raw >> 48) as u16,
                kind,
                index: ((raw >> 32) & 0xff) as u16,
            },
            slot: raw as u32,
        })
    }
}

const_assert!(NM_BDG_MAXRINGS <= 0xff);
