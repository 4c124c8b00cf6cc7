//! Team device context
//!
//! [`Team`] is the in-memory picture of one team device: its port store and
//! the interface info records the ports link to. [`Teamd`] bundles a team with
//! the state registry and the change notifier and is what the daemon shares
//! between tasks behind a single mutex.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::attrs::TeamMessage;
use crate::change::{ChangeNotifier, ChangeTypeMask};
use crate::error::{Result, TeamdError};
use crate::ifinfo::{Ifinfo, IfinfoList};
use crate::ports::{Port, PortStore};
use crate::reconcile::apply_pass;
use crate::state::{StateRegistry, StateVal, StateValue};

/// Ports and interface info of one team device
#[derive(Clone, Debug)]
pub struct Team {
    ifindex: u32,
    ports: PortStore,
    ifinfos: IfinfoList,
}

impl Team {
    pub fn new(ifindex: u32) -> Self {
        Self {
            ifindex,
            ports: PortStore::new(),
            ifinfos: IfinfoList::new(),
        }
    }

    /// Interface index of the team device
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn ports(&self) -> &PortStore {
        &self.ports
    }

    pub fn ifinfos(&self) -> &IfinfoList {
        &self.ifinfos
    }

    pub fn find_port(&self, ifindex: u32) -> Option<&Port> {
        self.ports.find(ifindex)
    }

    pub fn create_port(&mut self, ifindex: u32) -> Result<&mut Port> {
        self.ports.create(&mut self.ifinfos, ifindex)
    }

    pub fn destroy_port(&mut self, ifindex: u32) -> bool {
        self.ports.destroy(&mut self.ifinfos, ifindex)
    }

    pub(crate) fn find_or_create_port(&mut self, ifindex: u32) -> Result<&mut Port> {
        if self.ports.find(ifindex).is_none() {
            return self.ports.create(&mut self.ifinfos, ifindex);
        }
        self.ports
            .find_mut(ifindex)
            .ok_or_else(|| TeamdError::Resource(format!("Port {} vanished", ifindex)))
    }

    pub fn port_ifinfo(&self, port: &Port) -> Option<&Ifinfo> {
        port.ifinfo().and_then(|ifinfo| self.ifinfos.find(ifinfo))
    }

    /// A port is present while it is enslaved to this team and not removed
    pub fn is_port_present(&self, port: &Port) -> bool {
        !port.is_removed()
            && self
                .port_ifinfo(port)
                .is_some_and(|info| info.master_ifindex() == self.ifindex)
    }

    /// Record an rtnetlink master change
    pub fn update_ifinfo_master(&mut self, ifindex: u32, master_ifindex: u32) {
        self.ifinfos.update_master(ifindex, master_ifindex);
    }

    /// Drop an interface info record, clearing the back reference of its port
    pub fn destroy_ifinfo(&mut self, ifindex: u32) -> bool {
        let linked = self.ifinfos.destroy(ifindex);
        if linked {
            self.ports.unlink_ifinfo(ifindex);
        }
        linked
    }

    /// Clear `changed` flags and purge ports removed during the last pass
    pub(crate) fn cleanup_last_state(&mut self) -> Vec<u32> {
        self.ports.cleanup_pass(&mut self.ifinfos)
    }

    pub fn flush_ports(&mut self) {
        self.ports.flush(&mut self.ifinfos);
    }
}

/// Team, state registry and change handlers of one daemon instance
pub struct Teamd {
    team: Team,
    state: StateRegistry,
    notifier: ChangeNotifier,
}

/// How the daemon shares its context between tasks
pub type SharedTeamd = Arc<Mutex<Teamd>>;

impl Teamd {
    pub fn new(team_ifindex: u32) -> Self {
        Self {
            team: Team::new(team_ifindex),
            state: StateRegistry::new(),
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn into_shared(self) -> SharedTeamd {
        Arc::new(Mutex::new(self))
    }

    pub fn team(&self) -> &Team {
        &self.team
    }

    pub fn state(&self) -> &StateRegistry {
        &self.state
    }

    pub fn notifier_mut(&mut self) -> &mut ChangeNotifier {
        &mut self.notifier
    }

    /// Register state items, optionally owned by the port `owning_port`
    pub fn state_register<T: Send + Sync + 'static>(
        &mut self,
        val: &StateVal<T>,
        data: &Arc<T>,
        owning_port: Option<u32>,
        path_suffix: Option<&str>,
    ) -> Result<()> {
        let port = match owning_port {
            Some(ifindex) => Some(self.team.find_port(ifindex).ok_or_else(|| {
                TeamdError::NotFound(format!("port \"{}\" does not exist", ifindex))
            })?),
            None => None,
        };
        self.state.register(val, data, port, path_suffix)
    }

    pub fn state_unregister<T>(&mut self, val: &StateVal<T>, data: &Arc<T>) {
        self.state.unregister(val, data);
    }

    pub fn state_get(&self, path: &str) -> Result<StateValue> {
        self.state.get(&self.team, path).inspect_err(|e| {
            if matches!(e, TeamdError::NotFound(_)) {
                debug!(path, "State item lookup failed");
            }
        })
    }

    pub fn state_get_text(&self, path: &str) -> Result<String> {
        self.state_get(path).map(|value| value.to_string())
    }

    pub fn state_set(&self, path: &str, text: &str) -> Result<()> {
        self.state.set(&self.team, path, text)
    }

    pub fn state_dump(&self) -> Result<serde_json::Value> {
        self.state.dump(&self.team)
    }

    /// Apply one logical pass of port list messages
    ///
    /// The pass runs against a copy of the team; the copy replaces the live
    /// team only when every message applied. Port change handlers are called
    /// once afterwards if any message concerned this team.
    pub fn apply_port_list(&mut self, messages: &[TeamMessage]) -> Result<()> {
        let mut staged = self.team.clone();
        if !apply_pass(&mut staged, messages)? {
            debug!(team = self.team.ifindex, "No port list for this team in pass");
            return Ok(());
        }
        self.team = staged;

        let team = &self.team;
        self.state
            .retain_ports(|ifindex| team.find_port(ifindex).is_some());
        self.notifier.set_pending(ChangeTypeMask::PORT);
        self.notifier.dispatch(&self.team, ChangeTypeMask::PORT)
    }

    /// Record the master of an interface and notify ifinfo handlers
    ///
    /// Handlers only run when the recorded master actually changed.
    pub fn update_ifinfo_master(&mut self, ifindex: u32, master_ifindex: u32) -> Result<()> {
        let current = self
            .team
            .ifinfos()
            .find(ifindex)
            .map(Ifinfo::master_ifindex);
        if current == Some(master_ifindex) {
            return Ok(());
        }
        self.team.update_ifinfo_master(ifindex, master_ifindex);
        debug!(ifindex, master = master_ifindex, "Interface master changed");
        self.notify_ifinfo()
    }

    /// Forget an interface that went away; returns whether a port linked to it
    pub fn destroy_ifinfo(&mut self, ifindex: u32) -> Result<bool> {
        if self.team.ifinfos().find(ifindex).is_none() {
            return Ok(false);
        }
        let linked = self.team.destroy_ifinfo(ifindex);
        debug!(ifindex, linked, "Interface info destroyed");
        self.notify_ifinfo()?;
        Ok(linked)
    }

    fn notify_ifinfo(&mut self) -> Result<()> {
        self.notifier.set_pending(ChangeTypeMask::IFINFO);
        self.notifier.dispatch(&self.team, ChangeTypeMask::IFINFO)
    }

    /// Tear down the port store; items owned by ports go with them
    pub fn shutdown(&mut self) {
        self.team.flush_ports();
        self.state.retain_ports(|_| false);
        info!(team = self.team.ifindex, "Flushed team ports");
    }
}
