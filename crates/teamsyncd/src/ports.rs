//! Team port store
//!
//! Owns the port records of one team device in insertion order. Ports are
//! scanned with `retain_mut`, so destroying ports during a full scan never
//! invalidates the iteration.

use crate::error::Result;
use crate::ifinfo::IfinfoList;
use tracing::debug;

/// Duplex value reported for full duplex links
pub const DUPLEX_FULL: u8 = 1;

/// One team port (slave interface) as last reported by the kernel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Port {
    ifindex: u32,
    speed: u32,
    duplex: u8,
    link_up: bool,
    changed: bool,
    removed: bool,
    /// Key into the ifinfo list, cleared when the record goes away
    ifinfo: Option<u32>,
}

impl Port {
    fn new(ifindex: u32, ifinfo: u32) -> Self {
        Self {
            ifindex,
            speed: 0,
            duplex: 0,
            link_up: false,
            changed: false,
            removed: false,
            ifinfo: Some(ifinfo),
        }
    }

    /// Interface index as identified by the kernel
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// Speed in Mbit/s
    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// 0 = half duplex, 1 = full duplex
    pub fn duplex(&self) -> u8 {
        self.duplex
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Interface info key this port links to
    pub fn ifinfo(&self) -> Option<u32> {
        self.ifinfo
    }

    pub(crate) fn set_link_up(&mut self, link_up: bool) {
        self.link_up = link_up;
    }

    pub(crate) fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
    }

    pub(crate) fn set_removed(&mut self, removed: bool) {
        self.removed = removed;
    }

    pub(crate) fn set_speed(&mut self, speed: u32) {
        self.speed = speed;
    }

    pub(crate) fn set_duplex(&mut self, duplex: u8) {
        self.duplex = duplex;
    }

    pub(crate) fn unlink(&mut self) {
        self.ifinfo = None;
    }
}

/// Insertion-ordered set of ports with unique ifindexes
#[derive(Clone, Debug, Default)]
pub struct PortStore {
    ports: Vec<Port>,
}

impl PortStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a port and link it to its interface info
    ///
    /// The port is not inserted when linking fails, which also covers an
    /// attempt to create a second port with a known ifindex.
    pub fn create(&mut self, ifinfos: &mut IfinfoList, ifindex: u32) -> Result<&mut Port> {
        let ifinfo = ifinfos.link_with_port(ifindex)?;
        debug!(ifindex, "Created team port");
        self.ports.push(Port::new(ifindex, ifinfo));
        let last = self.ports.len() - 1;
        Ok(&mut self.ports[last])
    }

    /// Remove a port, unlinking (not freeing) its interface info
    pub fn destroy(&mut self, ifinfos: &mut IfinfoList, ifindex: u32) -> bool {
        match self.ports.iter().position(|port| port.ifindex == ifindex) {
            Some(pos) => {
                let port = self.ports.remove(pos);
                if let Some(ifinfo) = port.ifinfo {
                    ifinfos.unlink(ifinfo);
                }
                debug!(ifindex, "Destroyed team port");
                true
            }
            None => false,
        }
    }

    pub fn find(&self, ifindex: u32) -> Option<&Port> {
        self.ports.iter().find(|port| port.ifindex == ifindex)
    }

    pub fn find_mut(&mut self, ifindex: u32) -> Option<&mut Port> {
        self.ports.iter_mut().find(|port| port.ifindex == ifindex)
    }

    pub fn first(&self) -> Option<&Port> {
        self.ports.first()
    }

    /// Port following `port` in insertion order
    pub fn next(&self, port: &Port) -> Option<&Port> {
        let pos = self.ports.iter().position(|p| p.ifindex == port.ifindex)?;
        self.ports.get(pos + 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Forget the last pass: clear `changed` everywhere and purge tombstones
    ///
    /// Returns the ifindexes of destroyed ports.
    pub fn cleanup_pass(&mut self, ifinfos: &mut IfinfoList) -> Vec<u32> {
        let mut destroyed = Vec::new();
        self.ports.retain_mut(|port| {
            port.changed = false;
            if !port.removed {
                return true;
            }
            if let Some(ifinfo) = port.ifinfo {
                ifinfos.unlink(ifinfo);
            }
            destroyed.push(port.ifindex);
            false
        });
        if !destroyed.is_empty() {
            debug!(?destroyed, "Purged removed team ports");
        }
        destroyed
    }

    /// Destroy every port
    pub fn flush(&mut self, ifinfos: &mut IfinfoList) {
        for port in self.ports.drain(..) {
            if let Some(ifinfo) = port.ifinfo {
                ifinfos.unlink(ifinfo);
            }
        }
    }

    /// Clear the ifinfo relation of the port linked to `ifinfo`
    pub(crate) fn unlink_ifinfo(&mut self, ifinfo: u32) {
        for port in self.ports.iter_mut().filter(|p| p.ifinfo == Some(ifinfo)) {
            port.unlink();
        }
    }
}
