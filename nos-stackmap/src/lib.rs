//! NOS Stackmap
//!
//! Zero-copy packet dispatch between the rings of a software bridge and the
//! host protocol stack.
//!
//! # Architecture
//!
//! - **Arena**: one control block per packet buffer, tracking who holds it
//!   (`INVALID`, `STACK`, `QUEUED`, `PASSED`) and its forwarding link
//! - **Forwarding table**: per-ring FIFOs of buffers, one per connection,
//!   threaded through the control blocks
//! - **Flush**: scans a TX ring, runs every packet through the host stack and
//!   swaps the surviving buffers into the destination RX ring
//! - **Reserve pool**: spare buffers that replace ring buffers the stack keeps
//! - **Notification router**: wakes the stack port on NIC interrupts
//!
//! # Usage
//!
//! ```rust,ignore
//! use nos_stackmap::{PassthroughStack, PortKind, PortSpec, Stackmap, StackmapConfig};
//!
//! let sm = Stackmap::new("stack:", StackmapConfig::default(), 4096, Arc::new(PassthroughStack))?;
//! let master = sm.attach(&PortSpec::new("stack:0", PortKind::Stack, 1, 256))?;
//! let nic = sm.attach(&PortSpec::nic("eth0", 1, 256, forwarder))?;
//! sm.register()?;
//!
//! // after the application filled [hwcur, head) of the stack port TX ring
//! let outcome = sm.txsync(&master, 0)?;
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

#[macro_use]
mod logging;

pub mod error;
pub mod config;
pub mod types;
pub mod slot;
pub mod cb;
pub mod fwd;
pub mod ring;
pub mod reserve;
pub mod stack;
pub mod port;
pub mod bridge;
pub mod stats;
pub mod flush;
pub mod notify;
pub mod stackmap;

pub use error::{Error, Result};
pub use config::{StackmapConfig, StackmapMode};
pub use types::{BufIdx, CONN_HOST, ConnId, NULL_BUF, RingId, RingKind, SlotRef};
pub use slot::{Slot, SlotFlags};
pub use cb::{BufferArena, CbState, ControlBlock};
pub use fwd::ForwardTable;
pub use ring::{Notifier, Ring, RingState};
pub use reserve::ReservePool;
pub use stack::{HostStack, PassthroughStack, StackPacket, StackVerdict};
pub use port::{HwAdapter, HwForwarder, IrqStatus, Port, PortKind, PortSpec};
pub use bridge::{Bridge, MASTER_PORT, PAIRED_PORT};
pub use stats::{StackmapStats, StatsSnapshot};
pub use flush::{AbortReason, FlushOutcome};
pub use stackmap::Stackmap;
