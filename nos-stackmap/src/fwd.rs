//! Connection forwarding table
//!
//! Maps a connection id to a FIFO of buffer indices. The FIFO links live in
//! the control blocks of the buffers themselves, so the table only stores a
//! head/tail pair per connection plus the list of connections seen in the
//! current flush, in first-seen order.

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use crate::cb::BufferArena;
use crate::error::{Error, Result};
use crate::types::{BufIdx, ConnId, FT_QUEUES, NULL_BUF};

#[derive(Debug, Clone, Copy)]
struct FwdQueue {
    head: BufIdx,
    tail: BufIdx,
}

impl FwdQueue {
    const EMPTY: FwdQueue = FwdQueue {
        head: NULL_BUF,
        tail: NULL_BUF,
    };
}

/// Per-source-ring forwarding table, rebuilt on every flush
#[derive(Debug)]
pub struct ForwardTable {
    queues: Vec<FwdQueue>,
    active: Vec<ConnId>,
    npkts: u32,
}

impl ForwardTable {
    /// Create a table able to batch `batch` packets per flush
    pub fn new(batch: usize) -> Self {
        Self {
            queues: vec![FwdQueue::EMPTY; FT_QUEUES],
            active: Vec::with_capacity(batch),
            npkts: 0,
        }
    }

    /// Forget the previous round. Queue storage is not touched: every queue
    /// is emptied by its drain.
    pub fn reset(&mut self) {
        self.active.clear();
        self.npkts = 0;
    }

    /// Append `buf` to the FIFO of `conn`.
    ///
    /// The buffer must be held (`STACK` or `QUEUED`); its link is reset here.
    pub fn insert(&mut self, conn: ConnId, buf: BufIdx, arena: &BufferArena) -> Result<()> {
        let q = self
            .queues
            .get_mut(conn as usize)
            .ok_or_else(|| Error::InvalidArgument(format!("connection {} out of range", conn)))?;
        let cb = arena
            .cb(buf)
            .ok_or_else(|| Error::InvalidArgument(format!("buffer {} out of range", buf)))?;
        if !cb.state().links_valid() {
            return Err(Error::InvalidState(format!(
                "buffer {} not held ({:?})",
                buf,
                cb.state()
            )));
        }
        if q.tail == buf {
            return Err(Error::InvalidState(format!(
                "buffer {} already queued on connection {}",
                buf, conn
            )));
        }
        cb.set_forward_link(NULL_BUF);
        if q.head == NULL_BUF {
            q.head = buf;
            q.tail = buf;
            self.active.push(conn);
        } else {
            if let Some(prev) = arena.cb(q.tail) {
                prev.set_forward_link(buf);
            }
            q.tail = buf;
        }
        self.npkts += 1;
        Ok(())
    }

    /// Detach the FIFO of `conn` and walk it in insertion order.
    ///
    /// The queue is emptied as soon as the drain is created, so a second
    /// drain of the same connection yields nothing.
    pub fn drain<'a>(&mut self, conn: ConnId, arena: &'a BufferArena) -> Drain<'a> {
        let head = match self.queues.get_mut(conn as usize) {
            Some(q) => core::mem::replace(q, FwdQueue::EMPTY).head,
            None => NULL_BUF,
        };
        Drain {
            arena,
            cur: head,
            left: self.npkts,
        }
    }

    /// Connections queued this round, in first-seen order
    pub fn active(&self) -> &[ConnId] {
        &self.active
    }

    pub fn npkts(&self) -> u32 {
        self.npkts
    }

    pub fn is_queued(&self, conn: ConnId) -> bool {
        self.queues
            .get(conn as usize)
            .is_some_and(|q| q.head != NULL_BUF)
    }
}

/// Lazy walk over one detached connection FIFO
///
/// Follows the links written by [`ForwardTable::insert`] whatever the state
/// of the blocks: the host stack may hand a queued buffer back (`PASSED`)
/// before the drain reaches it.
#[derive(Debug)]
pub struct Drain<'a> {
    arena: &'a BufferArena,
    cur: BufIdx,
    left: u32,
}

impl Iterator for Drain<'_> {
    type Item = BufIdx;

    fn next(&mut self) -> Option<BufIdx> {
        if self.cur == NULL_BUF || self.left == 0 {
            return None;
        }
        let buf = self.cur;
        self.left -= 1;
        // Read the link before handing the buffer out: the caller may
        // invalidate it right away.
        self.cur = self.arena.cb(buf).map_or(NULL_BUF, |cb| cb.raw_link());
        Some(buf)
    }
}
