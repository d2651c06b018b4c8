//! Bridge ports and their rings

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::cb::BufferArena;
use crate::error::{Error, Result};
use crate::ring::Ring;
use crate::types::{NM_BDG_MAXRINGS, RingId, RingKind};

/// Role of a port on the stackmap bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// The stack port (bridge index 0), facing the application
    Stack,
    /// Host rings of a NIC: traffic from the host stack, never batched
    Host,
    /// A NIC attached through a bridge wrapper
    Nic,
}

/// Outcome of an interrupt notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqStatus {
    /// Fully handled
    Completed,
    /// Let the driver continue with its own processing
    Passed,
}

/// Default interrupt path of a bridge-wrapped NIC: pull packets from the
/// hardware ring and push them into the bridge.
pub trait HwForwarder: Send + Sync {
    fn intr_notify(&self, ring: &Ring) -> IrqStatus;
}

/// Hardware side requested for a NIC port
#[derive(Clone)]
pub struct HwSpec {
    pub num_tx_rings: u16,
    pub num_rx_rings: u16,
    pub num_slots: u32,
    pub forwarder: Arc<dyn HwForwarder>,
}

/// Port creation request
#[derive(Clone)]
pub struct PortSpec {
    pub name: String,
    pub kind: PortKind,
    pub num_tx_rings: u16,
    pub num_rx_rings: u16,
    pub num_slots: u32,
    pub hw: Option<HwSpec>,
}

impl PortSpec {
    pub fn new(name: &str, kind: PortKind, rings: u16, num_slots: u32) -> Self {
        Self {
            name: String::from(name),
            kind,
            num_tx_rings: rings,
            num_rx_rings: rings,
            num_slots,
            hw: None,
        }
    }

    /// NIC port whose hardware mirrors the virtual ring layout
    pub fn nic(name: &str, rings: u16, num_slots: u32, forwarder: Arc<dyn HwForwarder>) -> Self {
        let mut spec = Self::new(name, PortKind::Nic, rings, num_slots);
        spec.hw = Some(HwSpec {
            num_tx_rings: rings,
            num_rx_rings: rings,
            num_slots,
            forwarder,
        });
        spec
    }

    fn validate(&self) -> Result<()> {
        for n in [self.num_tx_rings, self.num_rx_rings] {
            if n == 0 || n as usize > NM_BDG_MAXRINGS {
                return Err(Error::InvalidArgument(format!(
                    "port {}: {} rings not in 1..={}",
                    self.name, n, NM_BDG_MAXRINGS
                )));
            }
        }
        if self.kind == PortKind::Nic && self.hw.is_none() {
            return Err(Error::InvalidArgument(format!(
                "port {}: NIC without hardware rings",
                self.name
            )));
        }
        Ok(())
    }
}

/// Hardware rings of a NIC port
pub struct HwAdapter {
    tx_rings: Vec<Ring>,
    rx_rings: Vec<Ring>,
    forwarder: Arc<dyn HwForwarder>,
}

impl HwAdapter {
    pub fn tx_rings(&self) -> &[Ring] {
        &self.tx_rings
    }

    pub fn rx_rings(&self) -> &[Ring] {
        &self.rx_rings
    }

    pub fn forwarder(&self) -> &Arc<dyn HwForwarder> {
        &self.forwarder
    }

    /// Locate a hardware ring by identity
    pub fn ring(&self, id: RingId) -> Option<&Ring> {
        let rings = match id.kind {
            RingKind::HwTx => &self.tx_rings,
            RingKind::HwRx => &self.rx_rings,
            _ => return None,
        };
        rings.get(id.index as usize).filter(|r| r.id() == id)
    }
}

/// A port attached to the bridge
pub struct Port {
    name: String,
    kind: PortKind,
    index: u16,
    tx_rings: Vec<Ring>,
    rx_rings: Vec<Ring>,
    hw: Option<HwAdapter>,
    active: AtomicBool,
    attached: AtomicBool,
}

impl core::fmt::Debug for Port {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("tx_rings", &self.tx_rings.len())
            .field("rx_rings", &self.rx_rings.len())
            .field("hw", &self.hw.is_some())
            .finish()
    }
}

fn release_rings(rings: &[Ring], arena: &BufferArena) {
    for ring in rings {
        ring.release_buffers(arena);
    }
}

/// Build `n` rings; on failure the rings already built give their buffers
/// back.
fn build_rings(port: u16, kind: RingKind, n: u16, slots: u32, arena: &BufferArena) -> Result<Vec<Ring>> {
    let mut rings = Vec::with_capacity(n as usize);
    for i in 0..n {
        match Ring::new(RingId::new(port, kind, i), slots, arena) {
            Ok(ring) => rings.push(ring),
            Err(e) => {
                release_rings(&rings, arena);
                return Err(e);
            }
        }
    }
    Ok(rings)
}

fn build_hw(port: u16, hw: &HwSpec, arena: &BufferArena) -> Result<HwAdapter> {
    let tx_rings = build_rings(port, RingKind::HwTx, hw.num_tx_rings, hw.num_slots, arena)?;
    let rx_rings = build_rings(port, RingKind::HwRx, hw.num_rx_rings, hw.num_slots, arena)
        .inspect_err(|_| release_rings(&tx_rings, arena))?;
    Ok(HwAdapter {
        tx_rings,
        rx_rings,
        forwarder: hw.forwarder.clone(),
    })
}

impl Port {
    pub(crate) fn build(index: u16, spec: &PortSpec, arena: &BufferArena) -> Result<Self> {
        spec.validate()?;
        let tx_rings = build_rings(index, RingKind::Tx, spec.num_tx_rings, spec.num_slots, arena)?;
        let rx_rings = build_rings(index, RingKind::Rx, spec.num_rx_rings, spec.num_slots, arena)
            .inspect_err(|_| release_rings(&tx_rings, arena))?;
        let hw = match &spec.hw {
            Some(hw) => Some(build_hw(index, hw, arena).inspect_err(|_| {
                release_rings(&tx_rings, arena);
                release_rings(&rx_rings, arena);
            })?),
            None => None,
        };
        Ok(Self {
            name: spec.name.clone(),
            kind: spec.kind,
            index,
            tx_rings,
            rx_rings,
            hw,
            active: AtomicBool::new(false),
            attached: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn is_host(&self) -> bool {
        self.kind == PortKind::Host
    }

    pub fn tx_rings(&self) -> &[Ring] {
        &self.tx_rings
    }

    pub fn rx_rings(&self) -> &[Ring] {
        &self.rx_rings
    }

    pub fn tx_ring(&self, i: usize) -> Option<&Ring> {
        self.tx_rings.get(i)
    }

    pub fn rx_ring(&self, i: usize) -> Option<&Ring> {
        self.rx_rings.get(i)
    }

    /// Rings of one side of the virtual port
    pub fn rings(&self, tx: bool) -> &[Ring] {
        if tx { &self.tx_rings } else { &self.rx_rings }
    }

    pub fn hw(&self) -> Option<&HwAdapter> {
        self.hw.as_ref()
    }

    /// Whether the port is in active I/O mode
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, on: bool) {
        self.active.store(on, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn set_attached(&self, on: bool) {
        self.attached.store(on, Ordering::Release);
    }

    /// Return every ring buffer to `arena`
    pub(crate) fn release_buffers(&self, arena: &BufferArena) {
        release_rings(&self.tx_rings, arena);
        release_rings(&self.rx_rings, arena);
        if let Some(hw) = &self.hw {
            release_rings(&hw.tx_rings, arena);
            release_rings(&hw.rx_rings, arena);
        }
    }
}
