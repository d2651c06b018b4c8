//! Interrupt notification router
//!
//! A completion on a hardware ring of a bridged NIC wakes the matching ring
//! of the stack port directly in pull mode. In push mode the NIC's own
//! forwarder runs instead.

use crate::config::StackmapMode;
use crate::port::{IrqStatus, Port};
use crate::stackmap::Stackmap;
use crate::stats::StackmapStats;
use crate::types::{RingId, RingKind};

impl Stackmap {
    /// Route a completion event of hardware ring `hw_ring` of `nic`
    pub fn intr_notify(&self, nic: &Port, hw_ring: RingId) -> IrqStatus {
        let Some(hw) = nic.hw() else {
            return IrqStatus::Completed;
        };
        let Some(kring) = hw.ring(hw_ring) else {
            sm_debug!("{}: no hardware ring {:?}", nic.name(), hw_ring);
            return IrqStatus::Completed;
        };
        if !nic.is_attached() {
            return IrqStatus::Completed;
        }
        let Some(master) = self.bridge.master() else {
            return IrqStatus::Completed;
        };
        if self.config.mode == StackmapMode::Push {
            return hw.forwarder().intr_notify(kring);
        }

        let tx = hw_ring.kind == RingKind::HwTx;
        let me = hw_ring.index as usize;
        let rings = master.rings(tx);
        let idx = if rings.len() > me { me } else { 0 };
        sm_trace!("{}: {} interrupt on ring {}", nic.name(), if tx { "tx" } else { "rx" }, me);
        if let Some(mkring) = rings.get(idx) {
            mkring.notify();
            StackmapStats::inc(&self.stats.notifications);
        }
        IrqStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackmapConfig;
    use crate::port::{HwForwarder, PortKind, PortSpec};
    use crate::ring::Ring;
    use crate::stack::PassthroughStack;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingForwarder(AtomicUsize);
    impl HwForwarder for CountingForwarder {
        fn intr_notify(&self, _ring: &Ring) -> IrqStatus {
            self.0.fetch_add(1, Ordering::Relaxed);
            IrqStatus::Passed
        }
    }

    fn setup(mode: StackmapMode) -> (Stackmap, Arc<Port>, Arc<Port>, Arc<CountingForwarder>) {
        let config = StackmapConfig::default().with_mode(mode);
        let sm = Stackmap::new("stack:", config, 1024, Arc::new(PassthroughStack)).unwrap();
        let master = sm.attach(&PortSpec::new("stack:0", PortKind::Stack, 2, 8)).unwrap();
        let fwd = Arc::new(CountingForwarder::default());
        let nic = sm.attach(&PortSpec::nic("eth0", 4, 8, fwd.clone())).unwrap();
        (sm, master, nic, fwd)
    }

    #[test]
    fn test_pull_wakes_master_ring() {
        let (sm, master, nic, fwd) = setup(StackmapMode::Pull);
        let rx1 = RingId::new(nic.index(), RingKind::HwRx, 1);
        assert_eq!(sm.intr_notify(&nic, rx1), IrqStatus::Completed);
        assert_eq!(master.rx_ring(1).unwrap().wakeups(), 1);

        // Beyond the master's ring count, ring 0 is woken.
        let tx3 = RingId::new(nic.index(), RingKind::HwTx, 3);
        sm.intr_notify(&nic, tx3);
        assert_eq!(master.tx_ring(0).unwrap().wakeups(), 1);
        assert_eq!(fwd.0.load(Ordering::Relaxed), 0);
        assert_eq!(sm.stats().notifications, 2);
    }

    #[test]
    fn test_push_uses_forwarder() {
        let (sm, master, nic, fwd) = setup(StackmapMode::Push);
        let rx0 = RingId::new(nic.index(), RingKind::HwRx, 0);
        assert_eq!(sm.intr_notify(&nic, rx0), IrqStatus::Passed);
        assert_eq!(fwd.0.load(Ordering::Relaxed), 1);
        assert_eq!(master.rx_ring(0).unwrap().wakeups(), 0);
    }

    #[test]
    fn test_unbridged_nic_is_completed() {
        let (sm, master, nic, fwd) = setup(StackmapMode::Push);
        sm.detach(nic.index()).unwrap();
        let rx0 = RingId::new(nic.index(), RingKind::HwRx, 0);
        assert_eq!(sm.intr_notify(&nic, rx0), IrqStatus::Completed);
        assert_eq!(sm.intr_notify(&master, rx0), IrqStatus::Completed);
        assert_eq!(fwd.0.load(Ordering::Relaxed), 0);
    }
}
