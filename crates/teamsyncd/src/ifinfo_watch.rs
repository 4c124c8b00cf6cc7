//! Interface master tracking
//!
//! Reads the master relation of network interfaces from sysfs and feeds it
//! into the [`Teamd`] context, which is what makes ports report `present`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::team::Teamd;

pub const SYS_CLASS_NET: &str = "/sys/class/net";

/// Source of interface master relations rooted at a sysfs `class/net` dir
#[derive(Clone, Debug)]
pub struct IfinfoWatch {
    root: PathBuf,
}

impl Default for IfinfoWatch {
    fn default() -> Self {
        Self::new(SYS_CLASS_NET)
    }
}

impl IfinfoWatch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Master ifindex of every interface under the root, 0 when it has none
    pub fn scan(&self) -> Result<HashMap<u32, u32>> {
        let mut masters = HashMap::new();
        for entry in fs::read_dir(&self.root)? {
            let dir = entry?.path();
            // plain files such as bonding_masters have no ifindex
            let Some(ifindex) = read_ifindex(&dir) else {
                continue;
            };
            let master = read_ifindex(&dir.join("master")).unwrap_or(0);
            masters.insert(ifindex, master);
        }
        Ok(masters)
    }

    /// Push current masters of the team's ports into the context
    ///
    /// The scan runs without holding the lock. Ports whose interface is gone
    /// get master 0; stale records without a port are destroyed. Returns the
    /// number of ports seen in the scan.
    #[instrument(skip(self, teamd), fields(root = %self.root.display()))]
    pub fn refresh(&self, teamd: &Mutex<Teamd>) -> Result<usize> {
        let masters = self.scan()?;

        let mut teamd = teamd.lock();
        let ports: Vec<u32> = teamd.team().ports().iter().map(|p| p.ifindex()).collect();
        let stale: Vec<u32> = teamd
            .team()
            .ifinfos()
            .iter()
            .filter(|info| !info.is_linked() && !masters.contains_key(&info.ifindex()))
            .map(|info| info.ifindex())
            .collect();

        let mut seen = 0;
        for ifindex in ports {
            let master = match masters.get(&ifindex) {
                Some(&master) => {
                    seen += 1;
                    master
                }
                None => {
                    debug!(ifindex, "Port interface not found in sysfs");
                    0
                }
            };
            teamd.update_ifinfo_master(ifindex, master)?;
        }
        for ifindex in stale {
            teamd.destroy_ifinfo(ifindex)?;
        }
        Ok(seen)
    }
}

fn read_ifindex(dir: &Path) -> Option<u32> {
    let text = fs::read_to_string(dir.join("ifindex")).ok()?;
    match text.trim().parse() {
        Ok(ifindex) => Some(ifindex),
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Unparsable ifindex in sysfs");
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::attrs::{PortAttr, PortItem, TeamMessage};
    use tempfile::TempDir;

    fn add_iface(root: &Path, name: &str, ifindex: u32, master: Option<&str>) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("ifindex"), format!("{}\n", ifindex)).unwrap();
        if let Some(master) = master {
            std::os::unix::fs::symlink(root.join(master), dir.join("master")).unwrap();
        }
    }

    fn port(ifindex: u32) -> PortItem {
        PortItem::new(vec![
            PortAttr::Ifindex(ifindex),
            PortAttr::Changed,
            PortAttr::LinkUp,
        ])
    }

    #[test]
    fn test_scan_reads_masters() {
        let root = TempDir::new().unwrap();
        add_iface(root.path(), "team0", 3, None);
        add_iface(root.path(), "eth0", 5, Some("team0"));
        add_iface(root.path(), "eth1", 6, None);
        fs::write(root.path().join("bonding_masters"), "\n").unwrap();

        let masters = IfinfoWatch::new(root.path()).scan().unwrap();
        assert_eq!(masters.len(), 3);
        assert_eq!(masters[&5], 3);
        assert_eq!(masters[&6], 0);
        assert_eq!(masters[&3], 0);
    }

    #[test]
    fn test_missing_root() {
        let root = TempDir::new().unwrap();
        let watch = IfinfoWatch::new(root.path().join("missing"));
        assert!(watch.scan().is_err());
    }

    #[test]
    fn test_refresh_marks_enslaved_ports_present() {
        let root = TempDir::new().unwrap();
        add_iface(root.path(), "team0", 3, None);
        add_iface(root.path(), "eth0", 5, Some("team0"));
        add_iface(root.path(), "eth1", 6, None);

        let mut teamd = Teamd::new(3);
        teamd
            .apply_port_list(&[TeamMessage::port_list(3, vec![port(5), port(6)])])
            .unwrap();
        let teamd = Mutex::new(teamd);
        let watch = IfinfoWatch::new(root.path());

        assert_eq!(watch.refresh(&teamd).unwrap(), 2);
        {
            let teamd = teamd.lock();
            let team = teamd.team();
            assert!(team.is_port_present(team.find_port(5).unwrap()));
            assert!(!team.is_port_present(team.find_port(6).unwrap()));
        }

        // eth0 leaves the team, eth1 vanishes
        fs::remove_file(root.path().join("eth0/master")).unwrap();
        fs::remove_dir_all(root.path().join("eth1")).unwrap();
        assert_eq!(watch.refresh(&teamd).unwrap(), 1);

        let teamd = teamd.lock();
        let team = teamd.team();
        assert!(!team.is_port_present(team.find_port(5).unwrap()));
        assert_eq!(team.ifinfos().find(6).unwrap().master_ifindex(), 0);
    }

    #[test]
    fn test_refresh_drops_stale_records() {
        let root = TempDir::new().unwrap();
        add_iface(root.path(), "eth0", 5, None);

        let mut teamd = Teamd::new(3);
        teamd.update_ifinfo_master(9, 3).unwrap();
        let teamd = Mutex::new(teamd);

        assert_eq!(IfinfoWatch::new(root.path()).refresh(&teamd).unwrap(), 0);
        assert!(teamd.lock().team().ifinfos().find(9).is_none());
    }
}
