//! The stackmap adapter
//!
//! Owns the bridge, the buffer arena and the reserve pool, and exposes the
//! entry points the ring owners call: [`Stackmap::txsync`],
//! [`Stackmap::rxsync`] and [`Stackmap::intr_notify`].

use alloc::format;
use alloc::sync::Arc;
use spin::Mutex;

use crate::bridge::{Bridge, MASTER_PORT};
use crate::cb::BufferArena;
use crate::config::StackmapConfig;
use crate::error::{Error, Result};
use crate::flush::FlushOutcome;
use crate::port::{Port, PortSpec};
use crate::reserve::ReservePool;
use crate::stack::HostStack;
use crate::stats::{StackmapStats, StatsSnapshot};
use crate::types::{RingId, RingKind};

pub struct Stackmap {
    pub(crate) config: StackmapConfig,
    pub(crate) bridge: Bridge,
    pub(crate) arena: Arc<BufferArena>,
    pub(crate) stack: Arc<dyn HostStack>,
    pub(crate) reserve: Mutex<Option<ReservePool>>,
    pub(crate) stats: StackmapStats,
}

impl core::fmt::Debug for Stackmap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stackmap")
            .field("config", &self.config)
            .field("bridge", &self.bridge.name())
            .field("num_bufs", &self.arena.num_bufs())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl Stackmap {
    /// Create a stackmap bridge named `name` over an arena of `num_bufs`
    /// buffers.
    pub fn new(
        name: &str,
        config: StackmapConfig,
        num_bufs: u32,
        stack: Arc<dyn HostStack>,
    ) -> Result<Self> {
        config.validate()?;
        let arena = Arc::new(BufferArena::new(num_bufs, config.buf_size)?);
        Ok(Self {
            config,
            bridge: Bridge::new(name),
            arena,
            stack,
            reserve: Mutex::new(None),
            stats: StackmapStats::default(),
        })
    }

    pub fn config(&self) -> &StackmapConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Arena handle; the host stack uses it to release buffers
    pub fn arena(&self) -> &Arc<BufferArena> {
        &self.arena
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Attach a port built from `spec`
    pub fn attach(&self, spec: &PortSpec) -> Result<Arc<Port>> {
        self.bridge.attach(spec, &self.arena)
    }

    /// Detach a port and return its ring buffers to the arena.
    ///
    /// Buffers the host stack still holds are freed on their hand-back.
    pub fn detach(&self, index: u16) -> Result<()> {
        let port = self.bridge.detach(index)?;
        port.release_buffers(&self.arena);
        Ok(())
    }

    /// Allocate the reserve pool. Returns the number of reserve buffers.
    pub fn register(&self) -> Result<usize> {
        let mut reserve = self.reserve.lock();
        if reserve.is_some() {
            return Err(Error::Busy(format!("{}: already registered", self.bridge.name())));
        }
        let want = self.config.num_extra_bufs;
        let bufs = self.arena.alloc_many(want);
        if bufs.len() < want {
            sm_warn!("{}: allocated only {} of {} extra buffers", self.bridge.name(), bufs.len(), want);
        }
        let n = bufs.len();
        *reserve = Some(ReservePool::new(RingId::new(MASTER_PORT, RingKind::Extra, 0), bufs));
        sm_info!("{}: registered with {} extra buffers", self.bridge.name(), n);
        Ok(n)
    }

    /// Return the reserve buffers to the arena. Parked buffers the stack
    /// still references stay out of the free list until it releases them.
    pub fn unregister(&self) {
        if let Some(mut pool) = self.reserve.lock().take() {
            let held = pool
                .take_buffers()
                .into_iter()
                .filter(|&buf| !self.arena.free(buf))
                .count();
            if held > 0 {
                sm_debug!("{}: {} reserve buffers still held by the stack", self.bridge.name(), held);
            }
        }
    }

    /// Reclaim reserve buffers the host stack has handed back, and free
    /// detached buffers it no longer holds
    pub fn reclaim(&self) -> usize {
        let parked = self
            .reserve
            .lock()
            .as_mut()
            .map_or(0, |pool| pool.reclaim(&self.arena));
        parked + self.arena.collect_deferred()
    }

    /// Free reserve slots right now
    pub fn reserve_available(&self) -> usize {
        self.reserve
            .lock()
            .as_ref()
            .map_or(0, |pool| pool.available(&self.arena))
    }

    /// Transmit sync on `port`'s TX ring `ring`.
    ///
    /// Consumes `[hwcur, head)` through the flush and commits the cursor the
    /// flush returns. A port outside the bridge simply drops its slots.
    pub fn txsync(&self, port: &Port, ring: usize) -> Result<FlushOutcome> {
        let kring = port
            .tx_ring(ring)
            .ok_or_else(|| Error::NotFound(format!("{}: no tx ring {}", port.name(), ring)))?;
        let mut kr = kring.lock();
        if !port.is_attached() {
            kr.drain_tx();
            return Ok(FlushOutcome::idle(kr.hwcur()));
        }
        let outcome = self.flush(port, kring, &mut kr);
        kr.complete_tx(outcome.cursor);
        Ok(outcome)
    }

    /// Receive sync on `port`'s RX ring `ring`, releasing slots up to `head`.
    ///
    /// In pull mode the stack port first polls the hardware RX rings paired
    /// with `ring` on every NIC of the bridge. Returns the new `hwtail`.
    pub fn rxsync(&self, port: &Port, ring: usize, head: u32) -> Result<u32> {
        let kring = port
            .rx_ring(ring)
            .ok_or_else(|| Error::NotFound(format!("{}: no rx ring {}", port.name(), ring)))?;
        if self.config.is_pull() && port.index() == MASTER_PORT && port.is_attached() {
            self.poll_hw_rings(port, ring)?;
        }
        let mut kr = kring.lock();
        kr.release_rx(head)
    }

    fn poll_hw_rings(&self, port: &Port, me: usize) -> Result<()> {
        let bdg = self.bridge.read();
        for peer in bdg.ports() {
            if peer.index() == port.index() || peer.is_host() {
                continue;
            }
            let Some(hw) = peer.hw() else {
                sm_error!("{}: port {} has no bridge wrapper", self.bridge.name(), peer.name());
                StackmapStats::inc(&self.stats.invariant_violations);
                return Err(Error::InvalidState(format!("port {} has no hardware rings", peer.name())));
            };
            // Hardware rings mirror the virtual port layout.
            let idx = if peer.tx_rings().len() > me { me } else { 0 };
            if let Some(hwk) = hw.rx_rings().get(idx) {
                hw.forwarder().intr_notify(hwk);
            }
        }
        Ok(())
    }
}
