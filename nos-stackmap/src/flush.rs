//! Dispatch/flush engine
//!
//! One flush runs per TX sync of a source ring:
//!
//! 1. scan `[hwcur, head)`, claim every buffer and hand it to the host stack
//!    (or, for the host port, queue it directly under [`CONN_HOST`]);
//! 2. batch the buffers per connection in the source ring's
//!    [`ForwardTable`];
//! 3. under the destination RX ring lock, swap the queued buffers into the
//!    destination, connection by connection in first-seen order, until the
//!    destination runs out of space.
//!
//! Buffers that do not fit are not dropped: their control blocks are
//! invalidated and the returned cursor is pulled back to the earliest of
//! them, so the next flush scans them again. Every slot inside that window
//! that was already delivered or finished has zero length and is skipped.

use crate::bridge::{MASTER_PORT, PAIRED_PORT};
use crate::cb::CbState;
use crate::fwd::ForwardTable;
use crate::port::Port;
use crate::ring::{Ring, RingState, nm_next, ring_distance};
use crate::slot::Slot;
use crate::stack::{StackPacket, StackVerdict};
use crate::stackmap::Stackmap;
use crate::stats::StackmapStats;
use crate::types::{CONN_HOST, ConnId, RingId, SlotRef};

/// Why a flush delivered nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The bridge lock is held by a writer
    BridgeBusy,
    /// Fewer than two ports on the bridge
    TooFewPorts,
    /// The destination port is missing from the bridge
    NoDestination,
    /// The destination port is not in active I/O mode
    DestinationInactive,
    /// The destination ring is stopped
    DestinationStopped,
    /// The source ring cannot be a flush source
    NotTxRing,
}

/// Result of one flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    /// New consumer cursor of the source ring
    pub cursor: u32,
    /// Buffers swapped into the destination ring
    pub delivered: u32,
    /// Buffers left for the next flush
    pub requeued: u32,
    /// Set when the flush gave up before delivering
    pub abort: Option<AbortReason>,
}

impl FlushOutcome {
    pub(crate) fn idle(cursor: u32) -> Self {
        Self {
            cursor,
            delivered: 0,
            requeued: 0,
            abort: None,
        }
    }

    fn aborted(cursor: u32, requeued: u32, reason: AbortReason) -> Self {
        Self {
            cursor,
            delivered: 0,
            requeued,
            abort: Some(reason),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }
}

/// Tracks the earliest undelivered source slot
struct Rewind {
    hwcur: u32,
    num_slots: u32,
    earliest: Option<u32>,
    count: u32,
}

impl Rewind {
    fn new(hwcur: u32, num_slots: u32) -> Self {
        Self {
            hwcur,
            num_slots,
            earliest: None,
            count: 0,
        }
    }

    fn note(&mut self, slot: u32) {
        let d = ring_distance(self.hwcur, slot, self.num_slots);
        self.earliest = Some(self.earliest.map_or(d, |e| e.min(d)));
        self.count += 1;
    }

    /// Cursor to report, given the scan stopped at `k`
    fn cursor(&self, k: u32) -> u32 {
        match self.earliest {
            Some(d) if d < ring_distance(self.hwcur, k, self.num_slots) => {
                (self.hwcur + d) % self.num_slots
            }
            _ => k,
        }
    }
}

impl Stackmap {
    /// Scan `kr` (TX ring `ring` of `src`) and deliver what it holds.
    ///
    /// The caller holds the source ring lock and commits the returned
    /// cursor.
    pub(crate) fn flush(&self, src: &Port, ring: &Ring, kr: &mut RingState) -> FlushOutcome {
        StackmapStats::inc(&self.stats.flushes);
        let me = ring.id();
        let n = kr.num_slots();
        let lim = n - 1;
        let start = kr.hwcur();
        let Some((slots, table, hwcur, head)) = kr.flush_parts() else {
            return self.abort(start, AbortReason::NotTxRing);
        };
        table.reset();

        let Some(bdg) = self.bridge.try_read() else {
            sm_debug!("{}: failed to obtain bridge read lock", self.bridge.name());
            return self.abort(hwcur, AbortReason::BridgeBusy);
        };
        if bdg.active_ports() < 2 {
            sm_debug!("{}: only {} active ports", self.bridge.name(), bdg.active_ports());
            return self.abort(hwcur, AbortReason::TooFewPorts);
        }

        // Traffic from the stack port or the host port goes to the paired
        // port; everything else goes up to the stack port.
        let host = src.is_host();
        let (dst, rx) = if src.index() == MASTER_PORT || host {
            (bdg.port(PAIRED_PORT), false)
        } else {
            (bdg.master(), true)
        };
        let Some(dst) = dst else {
            sm_debug!("{}: no destination for {}", self.bridge.name(), src.name());
            return self.abort(hwcur, AbortReason::NoDestination);
        };

        let mut k = hwcur;
        while k != head {
            let j = k;
            let slot = &mut slots[j as usize];
            if slot.is_empty() {
                k = nm_next(k, lim);
                continue;
            }
            let Some(cb) = self.arena.cb(slot.buf_idx) else {
                sm_error!("{}: slot {} holds invalid buffer {}", src.name(), j, slot.buf_idx);
                StackmapStats::inc(&self.stats.invariant_violations);
                slot.clear();
                k = nm_next(k, lim);
                continue;
            };
            let owner = SlotRef::new(me, j);

            if host {
                // Host traffic is never batched by connection.
                slot.conn = CONN_HOST;
                cb.claim(owner);
                self.enqueue(table, CONN_HOST, slot);
                k = nm_next(k, lim);
                continue;
            }

            match cb.state() {
                CbState::Passed => {
                    cb.invalidate();
                    slot.clear();
                    k = nm_next(k, lim);
                    continue;
                }
                CbState::Queued => {
                    if !self.extra_enqueue(slot) {
                        break;
                    }
                    k = nm_next(k, lim);
                    continue;
                }
                CbState::Invalid | CbState::Stack => {}
            }

            cb.invalidate();
            cb.claim(owner);
            let mut pkt = StackPacket::from_slot(src.index(), slot);
            let verdict = if rx {
                self.stack.recv(&mut pkt)
            } else {
                self.stack.send(&mut pkt)
            };
            match verdict {
                Ok(StackVerdict::Forward) => {
                    pkt.write_back(slot);
                    self.enqueue(table, pkt.conn, slot);
                }
                Ok(StackVerdict::Consumed) => {
                    cb.invalidate();
                    slot.clear();
                    StackmapStats::inc(&self.stats.consumed);
                }
                Ok(StackVerdict::Reserved) if cb.mark_queued() => {
                    if !self.extra_enqueue(slot) {
                        break;
                    }
                }
                Ok(StackVerdict::Reserved) => {
                    // Handed back before the verdict: nothing left to park.
                    if cb.state() != CbState::Passed {
                        sm_error!("{}: reserved buffer {} in state {:?}", src.name(), slot.buf_idx, cb.state());
                        StackmapStats::inc(&self.stats.invariant_violations);
                    }
                    cb.invalidate();
                    slot.clear();
                    StackmapStats::inc(&self.stats.consumed);
                }
                Err(_e) => {
                    sm_debug!("{}: early break at slot {}", src.name(), j);
                    StackmapStats::inc(&self.stats.early_breaks);
                    break;
                }
            }
            k = nm_next(k, lim);
        }

        if !dst.is_active() {
            sm_error!("{}: BUG: destination {} is not active", self.bridge.name(), dst.name());
            StackmapStats::inc(&self.stats.invariant_violations);
            let rewind = self.revert_all(table, slots, me, hwcur, n);
            return self.abort_with(rewind.cursor(k), rewind.count, AbortReason::DestinationInactive);
        }

        let dst_rings = dst.rx_rings();
        let dring = &dst_rings[me.index as usize % dst_rings.len()];

        let mut rk = dring.lock();
        if dring.is_stopped() {
            drop(rk);
            let rewind = self.revert_all(table, slots, me, hwcur, n);
            return self.abort_with(rewind.cursor(k), rewind.count, AbortReason::DestinationStopped);
        }
        let mut budget = table.npkts().min(rk.rx_space());
        let dlim = rk.num_slots() - 1;
        let mut j = rk.hwtail();
        let mut delivered = 0;
        let mut rewind = Rewind::new(hwcur, n);

        for i in 0..table.active().len() {
            let conn = table.active()[i];
            for buf in table.drain(conn, &self.arena) {
                let Some((cb, at)) = self.locate(buf, me, slots) else {
                    continue;
                };
                if budget == 0 {
                    cb.invalidate();
                    rewind.note(at);
                    continue;
                }
                let Some(rs) = rk.slot_mut(j) else {
                    break;
                };
                let ts = &mut slots[at as usize];
                core::mem::swap(rs, ts);
                ts.clear();
                ts.mark_changed();
                rs.mark_changed();
                cb.invalidate();
                j = nm_next(j, dlim);
                budget -= 1;
                delivered += 1;
            }
        }
        rk.set_hwtail(j);
        drop(rk);
        dring.notify();
        drop(bdg);

        #[cfg(feature = "debug_subsystems")]
        self.check_table_empty(table);

        StackmapStats::add(&self.stats.delivered, delivered as u64);
        StackmapStats::add(&self.stats.requeued, rewind.count as u64);
        if rewind.count > 0 {
            sm_debug!("{}: {} buffers left for next flush", src.name(), rewind.count);
        }
        FlushOutcome {
            cursor: rewind.cursor(k),
            delivered,
            requeued: rewind.count,
            abort: None,
        }
    }

    fn abort(&self, cursor: u32, reason: AbortReason) -> FlushOutcome {
        self.abort_with(cursor, 0, reason)
    }

    fn abort_with(&self, cursor: u32, requeued: u32, reason: AbortReason) -> FlushOutcome {
        StackmapStats::inc(&self.stats.aborted);
        StackmapStats::add(&self.stats.requeued, requeued as u64);
        FlushOutcome::aborted(cursor, requeued, reason)
    }

    /// Queue the claimed buffer of `slot`; drop it if the connection cannot
    /// be queued.
    fn enqueue(&self, table: &mut ForwardTable, conn: ConnId, slot: &mut Slot) {
        if let Err(_e) = table.insert(conn, slot.buf_idx, &self.arena) {
            sm_warn!("dropping buffer {} of connection {}", slot.buf_idx, conn);
            if let Some(cb) = self.arena.cb(slot.buf_idx) {
                cb.invalidate();
            }
            slot.clear();
            StackmapStats::inc(&self.stats.dropped);
        }
    }

    /// Move the buffer of `slot` to the reserve pool. False when the pool is
    /// exhausted (or not registered): the scan must stop here.
    fn extra_enqueue(&self, slot: &mut Slot) -> bool {
        let mut reserve = self.reserve.lock();
        let Some(pool) = reserve.as_mut() else {
            StackmapStats::inc(&self.stats.reserve_exhausted);
            return false;
        };
        match pool.enqueue(slot, &self.arena) {
            Ok(()) => {
                StackmapStats::inc(&self.stats.reserved);
                true
            }
            Err(_e) => {
                sm_debug!("{}: reserve pool exhausted", self.bridge.name());
                StackmapStats::inc(&self.stats.reserve_exhausted);
                false
            }
        }
    }

    /// Resolve the source slot of a queued buffer through its back-reference
    fn locate<'a>(
        &'a self,
        buf: u32,
        me: RingId,
        slots: &[Slot],
    ) -> Option<(&'a crate::cb::ControlBlock, u32)> {
        let cb = self.arena.cb(buf)?;
        let at = cb
            .owner()
            .filter(|o| o.ring == me)
            .map(|o| o.slot)
            .filter(|&s| slots.get(s as usize).is_some_and(|ts| ts.buf_idx == buf));
        if at.is_none() {
            sm_error!("buffer {} queued on {:?} but not found in its slot", buf, me);
            StackmapStats::inc(&self.stats.invariant_violations);
            cb.invalidate();
        }
        at.map(|at| (cb, at))
    }

    /// Give every queued buffer back to the source ring
    fn revert_all(
        &self,
        table: &mut ForwardTable,
        slots: &[Slot],
        me: RingId,
        hwcur: u32,
        n: u32,
    ) -> Rewind {
        let mut rewind = Rewind::new(hwcur, n);
        for i in 0..table.active().len() {
            let conn = table.active()[i];
            for buf in table.drain(conn, &self.arena) {
                if let Some((cb, at)) = self.locate(buf, me, slots) {
                    cb.invalidate();
                    rewind.note(at);
                }
            }
        }
        rewind
    }

    #[cfg(feature = "debug_subsystems")]
    fn check_table_empty(&self, table: &ForwardTable) {
        for &conn in table.active() {
            if table.is_queued(conn) {
                sm_error!("connection {} still queued after flush", conn);
                StackmapStats::inc(&self.stats.invariant_violations);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackmapConfig;
    use crate::port::{HwForwarder, IrqStatus, PortKind, PortSpec};
    use crate::stack::PassthroughStack;
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    struct NoopForwarder;
    impl HwForwarder for NoopForwarder {
        fn intr_notify(&self, _ring: &Ring) -> IrqStatus {
            IrqStatus::Completed
        }
    }

    fn stackmap() -> Stackmap {
        Stackmap::new(
            "stack:",
            StackmapConfig::default(),
            1024,
            Arc::new(PassthroughStack),
        )
        .unwrap()
    }

    fn fill(port: &Port, conns: &[ConnId]) -> Vec<u32> {
        let mut kr = port.tx_ring(0).unwrap().lock();
        let start = kr.hwcur();
        let n = kr.num_slots();
        let mut bufs = Vec::new();
        for (i, &c) in conns.iter().enumerate() {
            let s = kr.slot_mut((start + i as u32) % n).unwrap();
            s.len = 60;
            s.conn = c;
            bufs.push(s.buf_idx);
        }
        kr.set_head((start + conns.len() as u32) % n).unwrap();
        bufs
    }

    #[test]
    fn test_rewind_cursor() {
        let mut r = Rewind::new(6, 8);
        assert_eq!(r.cursor(2), 2);
        r.note(1);
        r.note(7);
        assert_eq!(r.count, 2);
        assert_eq!(r.cursor(2), 7);
        assert_eq!(r.cursor(7), 7);
    }

    #[test]
    fn test_host_traffic_goes_to_paired_port() {
        let sm = stackmap();
        let master = sm.attach(&PortSpec::new("stack:0", PortKind::Stack, 1, 8)).unwrap();
        let nic = sm.attach(&PortSpec::nic("eth0", 1, 8, Arc::new(NoopForwarder))).unwrap();
        let host = sm.attach(&PortSpec::new("eth0^", PortKind::Host, 1, 8)).unwrap();
        let bufs = fill(&host, &[5, 9, 5]);

        let outcome = sm.txsync(&host, 0).unwrap();
        assert_eq!(outcome.delivered, 3);
        assert_eq!(outcome.cursor, 3);
        // Arrival order, no per-connection batching
        let rk = nic.rx_ring(0).unwrap().lock();
        let got: Vec<u32> = rk.slots()[..3].iter().map(|s| s.buf_idx).collect();
        assert_eq!(got, bufs);
        assert!(rk.slots()[..3].iter().all(|s| s.conn == CONN_HOST));
        assert_eq!(rk.hwtail(), 3);
        assert_eq!(master.rx_ring(0).unwrap().lock().rx_pending(), 0);
    }

    #[test]
    fn test_space_ceiling_rewinds_cursor() {
        let sm = stackmap();
        let master = sm.attach(&PortSpec::new("stack:0", PortKind::Stack, 1, 4)).unwrap();
        let nic = sm.attach(&PortSpec::nic("eth0", 1, 8, Arc::new(NoopForwarder))).unwrap();
        let bufs = fill(&nic, &[5, 5, 7, 5]);

        let outcome = sm.txsync(&nic, 0).unwrap();
        assert_eq!(outcome.delivered, 3);
        assert_eq!(outcome.requeued, 1);
        assert_eq!(outcome.cursor, 2);
        {
            let rk = master.rx_ring(0).unwrap().lock();
            let got: Vec<u32> = rk.slots()[..3].iter().map(|s| s.buf_idx).collect();
            assert_eq!(got, [bufs[0], bufs[1], bufs[3]]);
            let kr = nic.tx_ring(0).unwrap().lock();
            assert_eq!(kr.slot(2).unwrap().buf_idx, bufs[2]);
            assert!(kr.slot(3).unwrap().is_empty());
        }
        assert_eq!(sm.arena().state(bufs[2]), Some(CbState::Invalid));

        // Consume the stack port and flush again: only the leftover moves.
        sm.rxsync(&master, 0, 3).unwrap();
        nic.tx_ring(0).unwrap().lock().set_head(4).unwrap();
        let outcome = sm.txsync(&nic, 0).unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.cursor, 4);
        assert_eq!(master.rx_ring(0).unwrap().lock().slot(3).unwrap().buf_idx, bufs[2]);
    }

    #[test]
    fn test_single_port_aborts() {
        let sm = stackmap();
        let master = sm.attach(&PortSpec::new("stack:0", PortKind::Stack, 1, 8)).unwrap();
        fill(&master, &[1, 2]);
        let outcome = sm.txsync(&master, 0).unwrap();
        assert_eq!(outcome.abort, Some(AbortReason::TooFewPorts));
        assert_eq!(outcome.cursor, 0);
        assert_eq!(sm.stats().aborted, 1);
    }

    #[test]
    fn test_stopped_destination_keeps_slots() {
        let sm = stackmap();
        let master = sm.attach(&PortSpec::new("stack:0", PortKind::Stack, 1, 8)).unwrap();
        let nic = sm.attach(&PortSpec::nic("eth0", 1, 8, Arc::new(NoopForwarder))).unwrap();
        let bufs = fill(&nic, &[3, 4]);
        master.rx_ring(0).unwrap().stop();

        let outcome = sm.txsync(&nic, 0).unwrap();
        assert_eq!(outcome.abort, Some(AbortReason::DestinationStopped));
        assert_eq!(outcome.cursor, 0);
        assert_eq!(outcome.requeued, 2);
        for b in bufs {
            assert_eq!(sm.arena().state(b), Some(CbState::Invalid));
        }
    }
}
