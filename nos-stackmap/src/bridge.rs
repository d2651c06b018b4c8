//! The bridge: port table and its lock
//!
//! Flushes take the lock shared; attach and detach take it exclusive, so a
//! flush never observes a topology change half way.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;
use spin::{RwLock, RwLockReadGuard};

use crate::cb::BufferArena;
use crate::error::{Error, Result};
use crate::port::{Port, PortKind, PortSpec};
use crate::types::NM_BDG_MAXPORTS;

/// Bridge index of the stack port
pub const MASTER_PORT: u16 = 0;

/// Bridge index the stack port and host port forward to
pub const PAIRED_PORT: u16 = 1;

/// Port table, read under the bridge lock
#[derive(Debug, Default)]
pub struct BridgeInner {
    ports: Vec<Option<Arc<Port>>>,
    names: HashMap<String, u16>,
    active: usize,
}

impl BridgeInner {
    pub fn active_ports(&self) -> usize {
        self.active
    }

    pub fn port(&self, index: u16) -> Option<&Arc<Port>> {
        self.ports.get(index as usize).and_then(Option::as_ref)
    }

    /// The stack port, authoritative for everything host-stack facing
    pub fn master(&self) -> Option<&Arc<Port>> {
        self.port(MASTER_PORT)
    }

    pub fn ports(&self) -> impl Iterator<Item = &Arc<Port>> {
        self.ports.iter().flatten()
    }
}

#[derive(Debug)]
pub struct Bridge {
    name: String,
    inner: RwLock<BridgeInner>,
}

impl Bridge {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            inner: RwLock::new(BridgeInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared lock without spinning; `None` while a writer holds it
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, BridgeInner>> {
        self.inner.try_read()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, BridgeInner> {
        self.inner.read()
    }

    pub fn active_ports(&self) -> usize {
        self.inner.read().active
    }

    pub fn port(&self, index: u16) -> Option<Arc<Port>> {
        self.inner.read().port(index).cloned()
    }

    pub fn master(&self) -> Option<Arc<Port>> {
        self.port(MASTER_PORT)
    }

    pub fn port_by_name(&self, name: &str) -> Option<Arc<Port>> {
        let inner = self.inner.read();
        let index = *inner.names.get(name)?;
        inner.port(index).cloned()
    }

    /// Create a port from `spec` at the first free index and attach it.
    ///
    /// Index 0 is reserved to the stack port, which must come first.
    pub fn attach(&self, spec: &PortSpec, arena: &BufferArena) -> Result<Arc<Port>> {
        let mut inner = self.inner.write();
        if inner.names.contains_key(spec.name.as_str()) {
            return Err(Error::Busy(format!("{}: port {} already attached", self.name, spec.name)));
        }
        let index = match inner.ports.iter().position(Option::is_none) {
            Some(i) => i,
            None if inner.ports.len() < NM_BDG_MAXPORTS => inner.ports.len(),
            None => return Err(Error::ResourceExhausted(format!("{}: no free port", self.name))),
        };
        let is_master = index == MASTER_PORT as usize;
        if is_master != (spec.kind == PortKind::Stack) {
            return Err(Error::InvalidArgument(format!(
                "{}: stack port must be port {}, got {} at {}",
                self.name, MASTER_PORT, spec.name, index
            )));
        }
        let port = Arc::new(Port::build(index as u16, spec, arena)?);
        port.set_attached(true);
        port.set_active(true);
        if index == inner.ports.len() {
            inner.ports.push(Some(port.clone()));
        } else {
            inner.ports[index] = Some(port.clone());
        }
        inner.names.insert(spec.name.clone(), index as u16);
        inner.active += 1;
        sm_info!("{}: attached {} as port {}", self.name.as_str(), port.name(), index);
        Ok(port)
    }

    /// Detach the port at `index`; the caller owns its buffers afterwards.
    pub fn detach(&self, index: u16) -> Result<Arc<Port>> {
        let mut inner = self.inner.write();
        let port = inner
            .ports
            .get_mut(index as usize)
            .and_then(Option::take)
            .ok_or_else(|| Error::NotFound(format!("{}: no port {}", self.name, index)))?;
        inner.names.remove(port.name());
        inner.active -= 1;
        port.set_active(false);
        port.set_attached(false);
        sm_info!("{}: detached {} from port {}", self.name.as_str(), port.name(), index);
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> BufferArena {
        BufferArena::new(1024, 2048).unwrap()
    }

    #[test]
    fn test_master_comes_first() {
        let a = arena();
        let bdg = Bridge::new("stack:");
        let host = PortSpec::new("stack:host", PortKind::Host, 1, 8);
        assert!(matches!(bdg.attach(&host, &a), Err(Error::InvalidArgument(_))));
        let master = bdg.attach(&PortSpec::new("stack:0", PortKind::Stack, 1, 8), &a).unwrap();
        assert_eq!(master.index(), MASTER_PORT);
        let host = bdg.attach(&host, &a).unwrap();
        assert_eq!(host.index(), PAIRED_PORT);
        assert_eq!(bdg.active_ports(), 2);
        let second = PortSpec::new("stack:1", PortKind::Stack, 1, 8);
        assert!(bdg.attach(&second, &a).is_err());
    }

    #[test]
    fn test_duplicate_name() {
        let a = arena();
        let bdg = Bridge::new("stack:");
        let spec = PortSpec::new("stack:0", PortKind::Stack, 1, 8);
        bdg.attach(&spec, &a).unwrap();
        assert!(matches!(bdg.attach(&spec, &a), Err(Error::Busy(_))));
    }

    #[test]
    fn test_detach_frees_index() {
        let a = arena();
        let bdg = Bridge::new("stack:");
        bdg.attach(&PortSpec::new("stack:0", PortKind::Stack, 1, 8), &a).unwrap();
        bdg.attach(&PortSpec::new("stack:host", PortKind::Host, 1, 8), &a).unwrap();
        let port = bdg.detach(1).unwrap();
        assert!(!port.is_attached());
        assert!(!port.is_active());
        assert_eq!(bdg.active_ports(), 1);
        assert!(bdg.port_by_name("stack:host").is_none());
        assert!(bdg.detach(1).is_err());
        let again = bdg.attach(&PortSpec::new("stack:h2", PortKind::Host, 1, 8), &a).unwrap();
        assert_eq!(again.index(), 1);
        assert_eq!(bdg.port_by_name("stack:h2").unwrap().index(), 1);
    }

    #[test]
    fn test_failed_attach_leaves_no_trace() {
        let a = BufferArena::new(22, 2048).unwrap();
        let bdg = Bridge::new("stack:");
        let spec = PortSpec::new("stack:0", PortKind::Stack, 2, 8);
        assert_eq!(bdg.attach(&spec, &a).unwrap_err(), Error::OutOfMemory);
        assert_eq!(a.free_count(), 20);
        assert_eq!(bdg.active_ports(), 0);
        assert!(bdg.port_by_name("stack:0").is_none());
        let small = PortSpec::new("stack:0", PortKind::Stack, 1, 8);
        assert_eq!(bdg.attach(&small, &a).unwrap().index(), MASTER_PORT);
    }

    #[test]
    fn test_try_read_fails_under_writer() {
        let bdg = Bridge::new("stack:");
        let guard = bdg.inner.write();
        assert!(bdg.try_read().is_none());
        drop(guard);
        assert!(bdg.try_read().is_some());
    }
}
