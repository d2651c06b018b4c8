//! Buffer control blocks and the buffer arena
//!
//! Every buffer index owns one [`ControlBlock`] in the [`BufferArena`]. The
//! block records who currently holds the buffer and, while the buffer waits
//! in a connection queue, the index of the next buffer of that queue.
//!
//! ```text
//!   INVALID ──claim()──> STACK ──mark_queued()──> QUEUED
//!      ▲                   │                        │
//!      │                   └──────mark_passed()─────┤
//!      └───────────invalidate()──────── PASSED <────┘
//! ```
//!
//! All fields are atomics: the host stack signals `PASSED` from its own
//! context while the engine owns the rest of the transitions.

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

use crate::error::{Error, Result};
use crate::types::{BufIdx, FIRST_BUF, NULL_BUF, SLOT_REF_NONE, SlotRef};

/// Ownership state of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CbState {
    /// No forwarding interest
    Invalid = 0,
    /// Claimed by the engine from a ring slot
    Stack = 1,
    /// Referenced by the host stack, parked outside the ring
    Queued = 2,
    /// Released by the host stack, waiting to be reclaimed
    Passed = 3,
}

impl CbState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CbState::Stack,
            2 => CbState::Queued,
            3 => CbState::Passed,
            _ => CbState::Invalid,
        }
    }

    /// Whether the forward link of a block in this state may be followed
    pub fn links_valid(self) -> bool {
        matches!(self, CbState::Stack | CbState::Queued)
    }
}

/// Per-buffer control block
#[derive(Debug)]
pub struct ControlBlock {
    state: AtomicU8,
    owner: AtomicU64,
    next: AtomicU32,
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(CbState::Invalid as u8),
            owner: AtomicU64::new(SLOT_REF_NONE),
            next: AtomicU32::new(NULL_BUF),
        }
    }
}

impl ControlBlock {
    pub fn state(&self) -> CbState {
        CbState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CbState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Return the block to `INVALID` with no link and no owner.
    ///
    /// Idempotent.
    pub fn invalidate(&self) {
        self.next.store(NULL_BUF, Ordering::Relaxed);
        self.owner.store(SLOT_REF_NONE, Ordering::Relaxed);
        self.set_state(CbState::Invalid);
    }

    /// Take the buffer for dispatch from `owner`, moving to `STACK`
    pub fn claim(&self, owner: SlotRef) {
        self.next.store(NULL_BUF, Ordering::Relaxed);
        self.owner.store(owner.encode(), Ordering::Relaxed);
        self.set_state(CbState::Stack);
    }

    /// `STACK -> QUEUED`. Returns false from any other state.
    pub fn mark_queued(&self) -> bool {
        self.state
            .compare_exchange(
                CbState::Stack as u8,
                CbState::Queued as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `STACK | QUEUED -> PASSED`, the host stack hand-back signal.
    /// Returns false when the buffer was not held.
    pub fn mark_passed(&self) -> bool {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if !CbState::from_u8(cur).links_valid() {
                return false;
            }
            match self.state.compare_exchange_weak(
                cur,
                CbState::Passed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn owner(&self) -> Option<SlotRef> {
        SlotRef::decode(self.owner.load(Ordering::Relaxed))
    }

    pub fn set_owner(&self, owner: SlotRef) {
        self.owner.store(owner.encode(), Ordering::Relaxed);
    }

    /// Next buffer of the same connection queue.
    ///
    /// `None` at the end of the queue, and also whenever the state does not
    /// allow the link to be dereferenced.
    pub fn forward_link(&self) -> Option<BufIdx> {
        if !self.state().links_valid() {
            return None;
        }
        match self.next.load(Ordering::Relaxed) {
            NULL_BUF => None,
            next => Some(next),
        }
    }

    pub(crate) fn set_forward_link(&self, next: BufIdx) {
        self.next.store(next, Ordering::Relaxed);
    }

    /// Raw link, regardless of state
    pub(crate) fn raw_link(&self) -> BufIdx {
        self.next.load(Ordering::Relaxed)
    }
}

/// Free list of the arena
#[derive(Debug)]
struct FreeList {
    bufs: Vec<BufIdx>,
    is_free: Vec<bool>,
    /// Buffers freed while the host stack still held them
    deferred: Vec<BufIdx>,
}

impl FreeList {
    fn put(&mut self, idx: BufIdx) {
        self.is_free[idx as usize] = true;
        self.bufs.push(idx);
    }

    fn take(&mut self) -> Option<BufIdx> {
        let idx = self.bufs.pop()?;
        self.is_free[idx as usize] = false;
        Some(idx)
    }
}

/// Control block storage for every buffer, plus the free list.
///
/// A buffer the host stack still references (`QUEUED`) is never handed out
/// again: freeing it only records it, and it joins the free list on its
/// `PASSED` hand-back.
#[derive(Debug)]
pub struct BufferArena {
    cbs: Vec<ControlBlock>,
    buf_size: u32,
    free: Mutex<FreeList>,
}

impl BufferArena {
    /// Create an arena of `num_bufs` buffers; indices 0 and 1 are reserved.
    pub fn new(num_bufs: u32, buf_size: u32) -> Result<Self> {
        if num_bufs <= FIRST_BUF {
            return Err(Error::InvalidArgument(format!(
                "arena needs more than {} buffers, got {}",
                FIRST_BUF, num_bufs
            )));
        }
        let mut cbs = Vec::new();
        cbs.resize_with(num_bufs as usize, ControlBlock::default);
        let mut is_free = vec![true; num_bufs as usize];
        is_free[..FIRST_BUF as usize].fill(false);
        // Pop order hands out low indices first.
        let bufs = (FIRST_BUF..num_bufs).rev().collect();
        Ok(Self {
            cbs,
            buf_size,
            free: Mutex::new(FreeList {
                bufs,
                is_free,
                deferred: Vec::new(),
            }),
        })
    }

    pub fn num_bufs(&self) -> u32 {
        self.cbs.len() as u32
    }

    pub fn buf_size(&self) -> u32 {
        self.buf_size
    }

    /// Control block of a packet buffer; `None` for reserved or out of range
    /// indices.
    pub fn cb(&self, idx: BufIdx) -> Option<&ControlBlock> {
        if idx < FIRST_BUF {
            return None;
        }
        self.cbs.get(idx as usize)
    }

    pub fn state(&self, idx: BufIdx) -> Option<CbState> {
        self.cb(idx).map(ControlBlock::state)
    }

    /// Host stack hand-back: the stack no longer references `idx`.
    ///
    /// A buffer already freed by its owner goes back to the free list here.
    pub fn release(&self, idx: BufIdx) -> bool {
        let Some(cb) = self.cb(idx) else {
            return false;
        };
        if !cb.mark_passed() {
            return false;
        }
        let mut free = self.free.lock();
        if let Some(pos) = free.deferred.iter().position(|&b| b == idx) {
            free.deferred.swap_remove(pos);
            cb.invalidate();
            free.put(idx);
        }
        true
    }

    pub fn alloc(&self) -> Option<BufIdx> {
        self.free.lock().take()
    }

    /// Allocate up to `n` buffers; fewer are returned when the arena runs dry.
    pub fn alloc_many(&self, n: usize) -> Vec<BufIdx> {
        let mut free = self.free.lock();
        let mut bufs = Vec::with_capacity(n.min(free.bufs.len()));
        while bufs.len() < n {
            match free.take() {
                Some(idx) => bufs.push(idx),
                None => break,
            }
        }
        bufs
    }

    /// Return a buffer to the free list.
    ///
    /// Reserved indices and buffers already free are ignored. A `QUEUED`
    /// buffer is held back until the stack releases it. Returns true when
    /// the buffer is free again.
    pub fn free(&self, idx: BufIdx) -> bool {
        let Some(cb) = self.cb(idx) else {
            return false;
        };
        let mut free = self.free.lock();
        if free.is_free[idx as usize] {
            sm_warn!("buffer {} freed twice", idx);
            return false;
        }
        if cb.state() == CbState::Queued {
            if !free.deferred.contains(&idx) {
                free.deferred.push(idx);
            }
            return false;
        }
        cb.invalidate();
        free.put(idx);
        true
    }

    /// Move held-back buffers the stack has released to the free list
    pub fn collect_deferred(&self) -> usize {
        let mut free = self.free.lock();
        let mut n = 0;
        let mut i = 0;
        while i < free.deferred.len() {
            let idx = free.deferred[i];
            match self.cb(idx) {
                Some(cb) if cb.state() == CbState::Queued => i += 1,
                Some(cb) => {
                    cb.invalidate();
                    free.deferred.swap_remove(i);
                    free.put(idx);
                    n += 1;
                }
                None => {
                    free.deferred.swap_remove(i);
                }
            }
        }
        n
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().bufs.len()
    }

    /// Buffers freed while still held by the stack
    pub fn deferred_count(&self) -> usize {
        self.free.lock().deferred.len()
    }
}
