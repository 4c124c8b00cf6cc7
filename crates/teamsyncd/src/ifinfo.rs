//! Interface info records
//!
//! Minimal link information a team port links to. Only the master relation is
//! tracked here; it decides whether a port is currently a live member of the
//! team device.

use crate::error::{Result, TeamdError};

/// Link information for one interface
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ifinfo {
    ifindex: u32,
    master_ifindex: u32,
    linked: bool,
}

impl Ifinfo {
    fn new(ifindex: u32) -> Self {
        Self {
            ifindex,
            master_ifindex: 0,
            linked: false,
        }
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// Interface index of the device this interface is enslaved to, 0 if none
    pub fn master_ifindex(&self) -> u32 {
        self.master_ifindex
    }

    /// Whether a port currently links to this record
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Interface info records of one team handle
#[derive(Clone, Debug, Default)]
pub struct IfinfoList {
    infos: Vec<Ifinfo>,
}

impl IfinfoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, ifindex: u32) -> Option<&Ifinfo> {
        self.infos.iter().find(|info| info.ifindex == ifindex)
    }

    fn find_create(&mut self, ifindex: u32) -> &mut Ifinfo {
        let pos = match self.infos.iter().position(|info| info.ifindex == ifindex) {
            Some(pos) => pos,
            None => {
                self.infos.push(Ifinfo::new(ifindex));
                self.infos.len() - 1
            }
        };
        &mut self.infos[pos]
    }

    /// Record a master change reported by rtnetlink
    pub fn update_master(&mut self, ifindex: u32, master_ifindex: u32) {
        self.find_create(ifindex).master_ifindex = master_ifindex;
    }

    /// Link a port to the record for `ifindex`, creating it when unknown
    pub fn link_with_port(&mut self, ifindex: u32) -> Result<u32> {
        let info = self.find_create(ifindex);
        if info.linked {
            return Err(TeamdError::Resource(format!(
                "Interface info {} is already linked to a port",
                ifindex
            )));
        }
        info.linked = true;
        Ok(info.ifindex)
    }

    /// Clear the link, the record itself is kept
    pub fn unlink(&mut self, ifindex: u32) {
        if let Some(info) = self.infos.iter_mut().find(|info| info.ifindex == ifindex) {
            info.linked = false;
        }
    }

    /// Drop a record; returns whether a port was linked to it
    pub fn destroy(&mut self, ifindex: u32) -> bool {
        match self.infos.iter().position(|info| info.ifindex == ifindex) {
            Some(pos) => self.infos.remove(pos).linked,
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ifinfo> {
        self.infos.iter()
    }

    /// Linked records in insertion order
    pub fn iter_linked(&self) -> impl Iterator<Item = &Ifinfo> {
        self.infos.iter().filter(|info| info.linked)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_creates_record() {
        let mut infos = IfinfoList::new();
        assert_eq!(infos.link_with_port(5).unwrap(), 5);
        assert!(infos.find(5).unwrap().is_linked());
        assert_eq!(infos.find(5).unwrap().master_ifindex(), 0);
    }

    #[test]
    fn test_double_link_fails() {
        let mut infos = IfinfoList::new();
        infos.link_with_port(5).unwrap();
        let err = infos.link_with_port(5).unwrap_err();
        assert!(matches!(err, TeamdError::Resource(_)));
    }

    #[test]
    fn test_unlink_keeps_record() {
        let mut infos = IfinfoList::new();
        infos.link_with_port(5).unwrap();
        infos.update_master(5, 3);
        infos.unlink(5);
        let info = infos.find(5).unwrap();
        assert!(!info.is_linked());
        assert_eq!(info.master_ifindex(), 3);
        assert_eq!(infos.iter_linked().count(), 0);
    }

    #[test]
    fn test_destroy_reports_link() {
        let mut infos = IfinfoList::new();
        infos.link_with_port(5).unwrap();
        infos.update_master(6, 3);
        assert!(infos.destroy(5));
        assert!(!infos.destroy(6));
        assert!(!infos.destroy(7));
        assert!(infos.is_empty());
    }
}
