//! Port list reconciliation
//!
//! Turns port list messages of the `team` generic netlink family into port
//! store updates. A logical pass covers every message of one snapshot reply
//! (or one multicast notification): ports purged at the start of a pass are
//! exactly those the previous pass reported as removed.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::attrs::{
    PortItem, TEAM_ATTR_PORT_CHANGED, TEAM_ATTR_PORT_LINKUP, TEAM_ATTR_PORT_REMOVED, TeamMessage,
};
use crate::error::{Result, TeamdError};
use crate::team::{Team, Teamd};
use crate::transport::TeamTransport;

/// One decoded port group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortUpdate {
    pub ifindex: u32,
    pub changed: bool,
    pub link_up: bool,
    pub removed: bool,
    pub speed: Option<u32>,
    pub duplex: Option<u8>,
}

impl TryFrom<&PortItem> for PortUpdate {
    type Error = TeamdError;

    fn try_from(item: &PortItem) -> Result<Self> {
        let ifindex = item.ifindex().ok_or_else(|| {
            TeamdError::Protocol("Port list entry without port ifindex".to_string())
        })?;
        Ok(Self {
            ifindex,
            changed: item.has_marker(TEAM_ATTR_PORT_CHANGED),
            link_up: item.has_marker(TEAM_ATTR_PORT_LINKUP),
            removed: item.has_marker(TEAM_ATTR_PORT_REMOVED),
            speed: item.speed(),
            duplex: item.duplex(),
        })
    }
}

fn apply_update(team: &mut Team, update: &PortUpdate) -> Result<()> {
    let port = team.find_or_create_port(update.ifindex)?;
    port.set_changed(update.changed);
    port.set_link_up(update.link_up);
    port.set_removed(update.removed);
    if let Some(speed) = update.speed {
        port.set_speed(speed);
    }
    if let Some(duplex) = update.duplex {
        port.set_duplex(duplex);
    }
    debug!(
        ifindex = update.ifindex,
        changed = update.changed,
        link_up = update.link_up,
        removed = update.removed,
        "Applied port update"
    );
    Ok(())
}

/// Apply one logical pass to `team`
///
/// Messages for another team device or without a port list are skipped. The
/// previous pass is cleaned up once, before the first applicable message.
/// Returns whether any message applied. On error `team` is left half
/// updated; callers apply passes to a copy.
pub fn apply_pass(team: &mut Team, messages: &[TeamMessage]) -> Result<bool> {
    let mut applied = false;
    for msg in messages {
        if msg.team_ifindex() != Some(team.ifindex()) {
            debug!(
                team = team.ifindex(),
                msg_team = ?msg.team_ifindex(),
                "Skipped message for another team"
            );
            continue;
        }
        let Some(items) = msg.port_items() else {
            continue;
        };

        if !applied {
            team.cleanup_last_state();
            applied = true;
        }
        for item in items {
            let update = PortUpdate::try_from(item)?;
            apply_update(team, &update)?;
        }
    }
    Ok(applied)
}

/// Requests port list snapshots and applies them to the team context
pub struct PortReconciler {
    transport: Box<dyn TeamTransport>,
    timeout: Duration,
}

impl PortReconciler {
    pub fn new(transport: Box<dyn TeamTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Run one pass against the kernel's current port list
    ///
    /// The transport round trip happens without holding the context lock.
    /// A failed or timed out request leaves the port store untouched.
    #[instrument(skip(self, teamd))]
    pub async fn reconcile(&mut self, teamd: &Mutex<Teamd>) -> Result<()> {
        let team_ifindex = teamd.lock().team().ifindex();

        let messages =
            tokio::time::timeout(self.timeout, self.transport.port_list_get(team_ifindex))
                .await
                .map_err(|_| {
                    TeamdError::Transport(format!(
                        "Port list request for team {} timed out after {:?}",
                        team_ifindex, self.timeout
                    ))
                })??;

        info!(team = team_ifindex, messages = messages.len(), "Received port list");
        apply_messages(teamd, &messages)
    }
}

/// Apply already received messages, e.g. a change event notification
pub fn apply_messages(teamd: &Mutex<Teamd>, messages: &[TeamMessage]) -> Result<()> {
    let mut teamd = teamd.lock();
    teamd.apply_port_list(messages).inspect_err(|e| {
        warn!(error = %e, "Port list pass failed, port store unchanged");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{PortAttr, TeamAttr, TeamCmd};
    use crate::transport::ReplayTransport;

    fn item(attrs: Vec<PortAttr>) -> PortItem {
        PortItem::new(attrs)
    }

    fn up(ifindex: u32, speed: u32) -> PortItem {
        item(vec![
            PortAttr::Ifindex(ifindex),
            PortAttr::Changed,
            PortAttr::LinkUp,
            PortAttr::Speed(speed),
            PortAttr::Duplex(1),
        ])
    }

    #[test]
    fn test_port_update_from_item() {
        let update = PortUpdate::try_from(&up(5, 1000)).unwrap();
        assert_eq!(
            update,
            PortUpdate {
                ifindex: 5,
                changed: true,
                link_up: true,
                removed: false,
                speed: Some(1000),
                duplex: Some(1),
            }
        );
        let err = PortUpdate::try_from(&item(vec![PortAttr::LinkUp])).unwrap_err();
        assert!(matches!(err, TeamdError::Protocol(_)));
    }

    #[test]
    fn test_foreign_team_is_skipped() {
        let mut team = Team::new(3);
        let applied =
            apply_pass(&mut team, &[TeamMessage::port_list(4, vec![up(5, 10)])]).unwrap();
        assert!(!applied);
        assert!(team.ports().is_empty());
    }

    #[test]
    fn test_message_without_port_list_is_skipped() {
        let mut team = Team::new(3);
        team.create_port(5).unwrap().set_removed(true);
        let msg = TeamMessage {
            cmd: TeamCmd::PortListGet,
            attrs: vec![TeamAttr::TeamIfindex(3)],
        };
        assert!(!apply_pass(&mut team, &[msg]).unwrap());
        // no cleanup ran
        assert!(team.find_port(5).is_some());
    }

    #[test]
    fn test_cleanup_runs_once_per_pass() {
        let mut team = Team::new(3);
        let messages = vec![
            TeamMessage::port_list(3, vec![up(5, 1000)]),
            TeamMessage::port_list(3, vec![up(6, 100)]),
        ];
        assert!(apply_pass(&mut team, &messages).unwrap());
        // the second message must not reset the changed flag set by the first
        assert!(team.find_port(5).unwrap().is_changed());
        assert!(team.find_port(6).unwrap().is_changed());
    }

    #[test]
    fn test_fields_retained_when_absent() {
        let mut team = Team::new(3);
        apply_pass(&mut team, &[TeamMessage::port_list(3, vec![up(5, 1000)])]).unwrap();
        apply_pass(
            &mut team,
            &[TeamMessage::port_list(3, vec![item(vec![PortAttr::Ifindex(5)])])],
        )
        .unwrap();

        let port = team.find_port(5).unwrap();
        assert_eq!(port.speed(), 1000);
        assert_eq!(port.duplex(), 1);
        assert!(!port.is_link_up());
        assert!(!port.is_changed());
    }

    #[tokio::test]
    async fn test_reconcile_applies_reply() {
        let mut transport = ReplayTransport::new();
        transport.push_reply(vec![TeamMessage::port_list(3, vec![up(5, 1000)])]);
        let requests = transport.requests();
        let mut reconciler = PortReconciler::new(Box::new(transport), Duration::from_secs(1));
        let teamd = Mutex::new(Teamd::new(3));

        reconciler.reconcile(&teamd).await.unwrap();
        assert_eq!(requests.lock().as_slice(), &[3]);
        assert_eq!(teamd.lock().team().find_port(5).unwrap().speed(), 1000);
    }

    #[tokio::test]
    async fn test_transport_failure_skips_cleanup() {
        let teamd = Mutex::new(Teamd::new(3));
        apply_messages(
            &teamd,
            &[TeamMessage::port_list(
                3,
                vec![item(vec![PortAttr::Ifindex(5), PortAttr::Removed])],
            )],
        )
        .unwrap();

        let transport = ReplayTransport::new();
        let mut reconciler = PortReconciler::new(Box::new(transport), Duration::from_secs(1));
        let err = reconciler.reconcile(&teamd).await.unwrap_err();
        assert!(matches!(err, TeamdError::Transport(_)));
        // tombstone still waiting for the next successful pass
        assert!(teamd.lock().team().find_port(5).unwrap().is_removed());
    }
}
