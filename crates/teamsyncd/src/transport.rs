//! Team generic netlink transport
//!
//! [`TeamTransport`] is the request/response seam of the reconciler. The
//! Linux implementation talks to the kernel `team` family through
//! `genetlink`; [`ReplayTransport`] answers from queued replies.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::attrs::TeamMessage;
use crate::error::{Result, TeamdError};

/// Sends port list snapshot requests
#[async_trait]
pub trait TeamTransport: Send {
    /// Request the port list of `team_ifindex` and collect every reply message
    async fn port_list_get(&mut self, team_ifindex: u32) -> Result<Vec<TeamMessage>>;
}

enum Reply {
    Messages(Vec<TeamMessage>),
    Raw(Vec<(u8, Vec<u8>)>),
    Error(TeamdError),
    Stall,
}

/// Transport answering requests from a queue of prepared replies
///
/// An exhausted queue fails the request like an unreachable kernel would.
#[derive(Default)]
pub struct ReplayTransport {
    replies: VecDeque<Reply>,
    requests: Arc<Mutex<Vec<u32>>>,
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&mut self, messages: Vec<TeamMessage>) {
        self.replies.push_back(Reply::Messages(messages));
    }

    /// Queue wire payloads (command, attributes) decoded on delivery
    pub fn push_raw(&mut self, payloads: Vec<(u8, Vec<u8>)>) {
        self.replies.push_back(Reply::Raw(payloads));
    }

    pub fn push_error(&mut self, error: TeamdError) {
        self.replies.push_back(Reply::Error(error));
    }

    /// Queue a reply that never arrives
    pub fn push_stall(&mut self) {
        self.replies.push_back(Reply::Stall);
    }

    /// Team ifindexes of the requests seen so far
    pub fn requests(&self) -> Arc<Mutex<Vec<u32>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl TeamTransport for ReplayTransport {
    async fn port_list_get(&mut self, team_ifindex: u32) -> Result<Vec<TeamMessage>> {
        self.requests.lock().push(team_ifindex);
        debug!(team = team_ifindex, queued = self.replies.len(), "Replaying port list reply");
        match self.replies.pop_front() {
            Some(Reply::Messages(messages)) => Ok(messages),
            Some(Reply::Raw(payloads)) => payloads
                .iter()
                .map(|(cmd, payload)| TeamMessage::from_bytes(*cmd, payload))
                .collect(),
            Some(Reply::Error(error)) => Err(error),
            Some(Reply::Stall) => std::future::pending().await,
            None => Err(TeamdError::Transport(format!(
                "No reply queued for team {}",
                team_ifindex
            ))),
        }
    }
}

#[cfg(target_os = "linux")]
pub use self::genl::GenlTransport;

#[cfg(target_os = "linux")]
mod genl {
    use futures::StreamExt;
    use genetlink::GenetlinkHandle;
    use netlink_packet_core::{NLM_F_ACK, NLM_F_REQUEST, NetlinkMessage, NetlinkPayload};
    use netlink_packet_generic::GenlMessage;
    use tracing::{debug, info};

    use super::TeamTransport;
    use crate::attrs::TeamMessage;
    use crate::error::{Result, TeamdError};

    /// Kernel transport over a generic netlink socket
    pub struct GenlTransport {
        handle: GenetlinkHandle,
    }

    impl GenlTransport {
        /// Open the socket and spawn its connection task on the current runtime
        pub fn connect() -> Result<Self> {
            let (conn, handle, _) = genetlink::new_connection()?;
            tokio::spawn(conn);
            info!("Connected to generic netlink");
            Ok(Self { handle })
        }
    }

    #[async_trait::async_trait]
    impl TeamTransport for GenlTransport {
        async fn port_list_get(&mut self, team_ifindex: u32) -> Result<Vec<TeamMessage>> {
            let mut nl_msg =
                NetlinkMessage::from(GenlMessage::from_payload(TeamMessage::port_list_get(
                    team_ifindex,
                )));
            nl_msg.header.flags = NLM_F_REQUEST | NLM_F_ACK;

            let responses = self.handle.request(nl_msg).await.map_err(|e| {
                TeamdError::Transport(format!("Failed to send port list request: {}", e))
            })?;
            futures::pin_mut!(responses);

            let mut messages = Vec::new();
            while let Some(response) = responses.next().await {
                let response = response.map_err(|e| {
                    TeamdError::Protocol(format!("Failed to decode team reply: {}", e))
                })?;
                match response.payload {
                    NetlinkPayload::InnerMessage(genl) => messages.push(genl.payload),
                    NetlinkPayload::Error(err) if err.code.is_some() => {
                        return Err(TeamdError::Transport(format!(
                            "Kernel rejected port list request for team {}: {}",
                            team_ifindex, err
                        )));
                    }
                    _ => {}
                }
            }
            debug!(team = team_ifindex, count = messages.len(), "Port list reply complete");
            Ok(messages)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{PortAttr, PortItem, TEAM_CMD_PORT_LIST_GET};

    #[tokio::test]
    async fn test_replay_in_order() {
        let mut transport = ReplayTransport::new();
        transport.push_reply(vec![TeamMessage::port_list(3, vec![])]);
        transport.push_error(TeamdError::Transport("down".to_string()));

        assert_eq!(transport.port_list_get(3).await.unwrap().len(), 1);
        assert!(matches!(
            transport.port_list_get(3).await,
            Err(TeamdError::Transport(_))
        ));
        assert!(matches!(
            transport.port_list_get(3).await,
            Err(TeamdError::Transport(_))
        ));
        assert_eq!(transport.requests().lock().len(), 3);
    }

    #[tokio::test]
    async fn test_raw_payload_is_decoded() {
        let msg = TeamMessage::port_list(
            3,
            vec![PortItem::new(vec![PortAttr::Ifindex(5), PortAttr::Speed(1000)])],
        );
        let mut transport = ReplayTransport::new();
        transport.push_raw(vec![(TEAM_CMD_PORT_LIST_GET, msg.to_bytes())]);

        let received = transport.port_list_get(3).await.unwrap();
        assert_eq!(received, vec![msg]);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_protocol_error() {
        let mut bytes = TeamMessage::port_list(
            3,
            vec![PortItem::new(vec![PortAttr::Ifindex(5)])],
        )
        .to_bytes();
        // declare a longer attribute than the buffer holds
        bytes[0] = 0xff;
        let mut transport = ReplayTransport::new();
        transport.push_raw(vec![(TEAM_CMD_PORT_LIST_GET, bytes)]);

        assert!(matches!(
            transport.port_list_get(3).await,
            Err(TeamdError::Protocol(_))
        ));
    }
}
