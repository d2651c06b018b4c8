//! Reserve ("extra") buffer pool
//!
//! When the host stack keeps a reference to a buffer that still sits in a
//! ring slot, the slot cannot be returned to its user. The pool swaps one of
//! its spare buffers into that slot and parks the referenced buffer until the
//! stack hands it back.

use alloc::vec::Vec;

use crate::cb::{BufferArena, CbState};
use crate::error::{Result, exhausted};
use crate::slot::Slot;
use crate::types::{BufIdx, FIRST_BUF, RingId, SlotRef};

#[derive(Debug)]
pub struct ReservePool {
    ring: RingId,
    slots: Vec<Slot>,
}

impl ReservePool {
    /// Build a pool over already allocated buffers
    pub fn new(ring: RingId, bufs: Vec<BufIdx>) -> Self {
        Self {
            ring,
            slots: bufs.into_iter().map(Slot::new).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// A reserve slot can take a new buffer unless it parks a `QUEUED` one.
    fn is_free(slot: &Slot, arena: &BufferArena) -> bool {
        arena.state(slot.buf_idx) != Some(CbState::Queued)
    }

    pub fn available(&self, arena: &BufferArena) -> usize {
        self.slots.iter().filter(|s| Self::is_free(s, arena)).count()
    }

    /// Park the buffer of `slot` in the pool and put a spare buffer in its
    /// place. The ring slot comes back empty.
    pub fn enqueue(&mut self, slot: &mut Slot, arena: &BufferArena) -> Result<()> {
        let Some(i) = self.slots.iter().position(|s| Self::is_free(s, arena)) else {
            return Err(exhausted("reserve pool"));
        };
        let spare = &mut self.slots[i];
        // A previously parked buffer handed back by the stack is reclaimed
        // into the ring here.
        if let Some(cb) = arena.cb(spare.buf_idx) {
            cb.invalidate();
        }
        core::mem::swap(spare, slot);
        slot.clear();
        slot.mark_changed();
        if let Some(cb) = arena.cb(spare.buf_idx) {
            cb.set_owner(SlotRef::new(self.ring, i as u32));
        }
        sm_trace!("parked buffer {} in reserve slot {}", spare.buf_idx, i);
        Ok(())
    }

    /// Invalidate every parked buffer the stack has handed back.
    pub fn reclaim(&mut self, arena: &BufferArena) -> usize {
        let mut n = 0;
        for slot in &mut self.slots {
            if let Some(cb) = arena.cb(slot.buf_idx) {
                if cb.state() == CbState::Passed {
                    cb.invalidate();
                    slot.clear();
                    n += 1;
                }
            }
        }
        n
    }

    /// Empty the pool, returning its packet buffers
    pub fn take_buffers(&mut self) -> Vec<BufIdx> {
        self.slots
            .drain(..)
            .map(|s| s.buf_idx)
            .filter(|&b| b >= FIRST_BUF)
            .collect()
    }

    pub fn slot(&self, i: usize) -> Option<&Slot> {
        self.slots.get(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RingKind;

    fn setup(n: usize) -> (BufferArena, ReservePool) {
        let arena = BufferArena::new(64, 2048).unwrap();
        let bufs = arena.alloc_many(n);
        (arena, ReservePool::new(RingId::new(0, RingKind::Extra, 0), bufs))
    }

    fn queued_slot(arena: &BufferArena, buf: BufIdx) -> Slot {
        let cb = arena.cb(buf).unwrap();
        cb.claim(SlotRef::new(RingId::new(1, RingKind::Tx, 0), 4));
        assert!(cb.mark_queued());
        Slot {
            buf_idx: buf,
            len: 100,
            conn: 6,
            ..Slot::default()
        }
    }

    #[test]
    fn test_enqueue_substitutes_buffer() {
        let (arena, mut pool) = setup(2);
        let mut slot = queued_slot(&arena, 40);
        pool.enqueue(&mut slot, &arena).unwrap();
        assert_eq!(slot.buf_idx, 2);
        assert!(slot.is_empty());
        assert_eq!(pool.slot(0).unwrap().buf_idx, 40);
        assert_eq!(pool.slot(0).unwrap().len, 100);
        let owner = arena.cb(40).unwrap().owner().unwrap();
        assert_eq!(owner.ring.kind, RingKind::Extra);
        assert_eq!(owner.slot, 0);
        assert_eq!(pool.available(&arena), 1);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let (arena, mut pool) = setup(1);
        let mut a = queued_slot(&arena, 40);
        let mut b = queued_slot(&arena, 41);
        pool.enqueue(&mut a, &arena).unwrap();
        let err = pool.enqueue(&mut b, &arena).unwrap_err();
        assert!(matches!(err, crate::error::Error::ResourceExhausted(_)));
        assert_eq!(b.buf_idx, 41);
        assert_eq!(b.len, 100);
    }

    #[test]
    fn test_passed_buffer_is_reused() {
        let (arena, mut pool) = setup(1);
        let mut a = queued_slot(&arena, 40);
        pool.enqueue(&mut a, &arena).unwrap();
        assert!(arena.release(40));
        let mut b = queued_slot(&arena, 41);
        pool.enqueue(&mut b, &arena).unwrap();
        assert_eq!(b.buf_idx, 40);
        assert_eq!(arena.state(40), Some(CbState::Invalid));
    }

    #[test]
    fn test_reclaim_and_take() {
        let (arena, mut pool) = setup(2);
        let mut a = queued_slot(&arena, 40);
        pool.enqueue(&mut a, &arena).unwrap();
        assert_eq!(pool.reclaim(&arena), 0);
        arena.release(40);
        assert_eq!(pool.reclaim(&arena), 1);
        assert_eq!(arena.state(40), Some(CbState::Invalid));
        let mut bufs = pool.take_buffers();
        bufs.sort();
        assert_eq!(bufs, alloc::vec![3, 40]);
        assert_eq!(pool.capacity(), 0);
    }
}
