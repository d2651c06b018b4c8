//! Rings of slots and their cursors
//!
//! A ring is split between the kernel and the user by its cursors:
//!
//! - TX: the user fills slots and moves `head` (at most up to `hwtail`);
//!   txsync consumes `[hwcur, head)`.
//! - RX: the kernel produces at `hwtail`, the user consumes `[hwcur, hwtail)`
//!   and releases slots by moving `head`.
//!
//! All cursor and slot mutation happens under the ring lock.

use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::{Mutex, MutexGuard};

use crate::cb::BufferArena;
use crate::error::{Error, Result};
use crate::fwd::ForwardTable;
use crate::slot::Slot;
use crate::types::{RingId, RingKind};

/// Next slot index, wrapping at `lim` (the last valid index)
#[inline]
pub fn nm_next(i: u32, lim: u32) -> u32 {
    if i == lim { 0 } else { i + 1 }
}

/// Previous slot index, wrapping at `lim`
#[inline]
pub fn nm_prev(i: u32, lim: u32) -> u32 {
    if i == 0 { lim } else { i - 1 }
}

/// Distance from `from` to `to` walking forward in a ring of `n` slots
#[inline]
pub fn ring_distance(from: u32, to: u32, n: u32) -> u32 {
    if to >= from { to - from } else { to + n - from }
}

/// Wakeup hook of a ring consumer
pub trait Notifier: Send + Sync {
    fn notify(&self, ring: RingId);
}

/// Cursor and slot state of a ring, protected by the ring lock
#[derive(Debug)]
pub struct RingState {
    slots: Vec<Slot>,
    hwcur: u32,
    hwtail: u32,
    head: u32,
    cur: u32,
    table: Option<ForwardTable>,
}

impl RingState {
    pub fn num_slots(&self) -> u32 {
        self.slots.len() as u32
    }

    fn lim(&self) -> u32 {
        self.num_slots() - 1
    }

    pub fn hwcur(&self) -> u32 {
        self.hwcur
    }

    pub fn hwtail(&self) -> u32 {
        self.hwtail
    }

    pub fn head(&self) -> u32 {
        self.head
    }

    pub fn cur(&self) -> u32 {
        self.cur
    }

    pub fn slot(&self, i: u32) -> Option<&Slot> {
        self.slots.get(i as usize)
    }

    pub fn slot_mut(&mut self, i: u32) -> Option<&mut Slot> {
        self.slots.get_mut(i as usize)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// User side: hand `[hwcur, head)` to the kernel (TX) or release
    /// consumed slots (RX). The head may not pass `hwtail`.
    pub fn set_head(&mut self, head: u32) -> Result<()> {
        let n = self.num_slots();
        if head >= n {
            return Err(Error::InvalidArgument(format!(
                "head {} beyond ring of {} slots",
                head, n
            )));
        }
        let avail = ring_distance(self.hwcur, self.hwtail, n);
        if ring_distance(self.hwcur, head, n) > avail {
            return Err(Error::InvalidArgument(format!(
                "head {} outside [{}, {}]",
                head, self.hwcur, self.hwtail
            )));
        }
        self.head = head;
        self.cur = head;
        Ok(())
    }

    /// Free slots a producer may fill on an RX ring
    pub fn rx_space(&self) -> u32 {
        let busy = ring_distance(self.hwcur, self.hwtail, self.num_slots());
        self.lim() - busy
    }

    /// Slots available to the RX user, `[hwcur, hwtail)`
    pub fn rx_pending(&self) -> u32 {
        ring_distance(self.hwcur, self.hwtail, self.num_slots())
    }

    /// TX sync completion: everything up to `done` has been consumed
    pub(crate) fn complete_tx(&mut self, done: u32) {
        self.hwcur = done;
        self.hwtail = nm_prev(done, self.lim());
    }

    /// TX sync for a port outside any bridge: drop everything
    pub(crate) fn drain_tx(&mut self) {
        let head = self.head;
        self.complete_tx(head);
    }

    pub(crate) fn set_hwtail(&mut self, hwtail: u32) {
        self.hwtail = hwtail;
    }

    /// Split borrow used by the flush: slots, table and consumer cursors
    pub(crate) fn flush_parts(&mut self) -> Option<(&mut [Slot], &mut ForwardTable, u32, u32)> {
        let table = self.table.as_mut()?;
        Some((&mut self.slots, table, self.hwcur, self.head))
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }

    /// RX consumer release: advance `hwcur` to `head` and report `hwtail`
    pub(crate) fn release_rx(&mut self, head: u32) -> Result<u32> {
        self.set_head(head)?;
        self.hwcur = head;
        Ok(self.hwtail)
    }
}

/// A ring with its lock, stop flag and notification hook
pub struct Ring {
    id: RingId,
    num_slots: u32,
    state: Mutex<RingState>,
    stopped: AtomicBool,
    wakeups: AtomicU64,
    notifier: Mutex<Option<Arc<dyn Notifier>>>,
}

impl core::fmt::Debug for Ring {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ring")
            .field("id", &self.id)
            .field("num_slots", &self.num_slots)
            .field("stopped", &self.is_stopped())
            .field("wakeups", &self.wakeups())
            .finish()
    }
}

impl Ring {
    /// Create a ring of `num_slots` slots, each backed by a buffer from
    /// `arena`. TX rings also get a forwarding table.
    pub fn new(id: RingId, num_slots: u32, arena: &BufferArena) -> Result<Self> {
        if num_slots < 2 {
            return Err(Error::InvalidArgument(format!(
                "ring needs at least 2 slots, got {}",
                num_slots
            )));
        }
        let bufs = arena.alloc_many(num_slots as usize);
        if bufs.len() < num_slots as usize {
            for b in bufs {
                arena.free(b);
            }
            return Err(Error::OutOfMemory);
        }
        let slots = bufs.into_iter().map(Slot::new).collect();
        let lim = num_slots - 1;
        let (hwtail, table) = match id.kind {
            RingKind::Tx | RingKind::HwTx => (lim, Some(ForwardTable::new(num_slots as usize))),
            _ => (0, None),
        };
        Ok(Self {
            id,
            num_slots,
            state: Mutex::new(RingState {
                slots,
                hwcur: 0,
                hwtail,
                head: 0,
                cur: 0,
                table,
            }),
            stopped: AtomicBool::new(false),
            wakeups: AtomicU64::new(0),
            notifier: Mutex::new(None),
        })
    }

    pub fn id(&self) -> RingId {
        self.id
    }

    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    /// Take the ring lock
    pub fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn start(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        *self.notifier.lock() = Some(notifier);
    }

    /// Wake the ring consumer
    pub fn notify(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
        let notifier = self.notifier.lock().clone();
        if let Some(n) = notifier {
            n.notify(self.id);
        }
    }

    pub fn wakeups(&self) -> u64 {
        self.wakeups.load(Ordering::Relaxed)
    }

    /// Return every slot buffer to `arena`
    pub(crate) fn release_buffers(&self, arena: &BufferArena) {
        let mut st = self.state.lock();
        for slot in st.slots_mut() {
            arena.free(slot.buf_idx);
            slot.buf_idx = crate::types::NULL_BUF;
        }
    }
}
