//! Team generic netlink attribute codec
//!
//! Typed view of the `team` generic netlink family payload. Only the parts
//! needed for port list synchronization are decoded; option lists and unknown
//! attributes are carried as opaque [`DefaultNla`] values.
//!
//! Layout of a port list reply:
//!
//! ```text
//! TEAM_ATTR_TEAM_IFINDEX  u32
//! TEAM_ATTR_LIST_PORT     nested
//!   TEAM_ATTR_ITEM_PORT   nested
//!     TEAM_ATTR_PORT_IFINDEX  u32
//!     TEAM_ATTR_PORT_CHANGED  flag
//!     TEAM_ATTR_PORT_LINKUP   flag
//!     TEAM_ATTR_PORT_SPEED    u32
//!     TEAM_ATTR_PORT_DUPLEX   u8
//!     TEAM_ATTR_PORT_REMOVED  flag
//! ```

use byteorder::{ByteOrder, NativeEndian};
use netlink_packet_generic::{GenlFamily, GenlHeader};
use netlink_packet_utils::{
    DecodeError, Emitable, Parseable, ParseableParametrized,
    nla::{DefaultNla, Nla, NlaBuffer, NlasIterator},
    parsers::{parse_u8, parse_u32},
};

use crate::error::{Result, TeamdError};

/// Generic netlink family name registered by the team driver
pub const TEAM_GENL_NAME: &str = "team";
/// Generic netlink family version
pub const TEAM_GENL_VERSION: u8 = 1;

pub const TEAM_CMD_NOOP: u8 = 0;
pub const TEAM_CMD_OPTIONS_SET: u8 = 1;
pub const TEAM_CMD_OPTIONS_GET: u8 = 2;
pub const TEAM_CMD_PORT_LIST_GET: u8 = 3;

pub const TEAM_ATTR_TEAM_IFINDEX: u16 = 1;
pub const TEAM_ATTR_LIST_OPTION: u16 = 2;
pub const TEAM_ATTR_LIST_PORT: u16 = 3;

pub const TEAM_ATTR_ITEM_PORT: u16 = 1;

pub const TEAM_ATTR_PORT_IFINDEX: u16 = 1;
pub const TEAM_ATTR_PORT_CHANGED: u16 = 2;
pub const TEAM_ATTR_PORT_LINKUP: u16 = 3;
pub const TEAM_ATTR_PORT_SPEED: u16 = 4;
pub const TEAM_ATTR_PORT_DUPLEX: u16 = 5;
pub const TEAM_ATTR_PORT_REMOVED: u16 = 6;

/// Team generic netlink command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamCmd {
    Noop,
    OptionsSet,
    OptionsGet,
    PortListGet,
    Other(u8),
}

impl From<u8> for TeamCmd {
    fn from(cmd: u8) -> Self {
        match cmd {
            TEAM_CMD_NOOP => TeamCmd::Noop,
            TEAM_CMD_OPTIONS_SET => TeamCmd::OptionsSet,
            TEAM_CMD_OPTIONS_GET => TeamCmd::OptionsGet,
            TEAM_CMD_PORT_LIST_GET => TeamCmd::PortListGet,
            other => TeamCmd::Other(other),
        }
    }
}

impl From<TeamCmd> for u8 {
    fn from(cmd: TeamCmd) -> Self {
        match cmd {
            TeamCmd::Noop => TEAM_CMD_NOOP,
            TeamCmd::OptionsSet => TEAM_CMD_OPTIONS_SET,
            TeamCmd::OptionsGet => TEAM_CMD_OPTIONS_GET,
            TeamCmd::PortListGet => TEAM_CMD_PORT_LIST_GET,
            TeamCmd::Other(other) => other,
        }
    }
}

/// Attribute inside one port item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortAttr {
    Ifindex(u32),
    Changed,
    LinkUp,
    Speed(u32),
    Duplex(u8),
    Removed,
    Other(DefaultNla),
}

impl Nla for PortAttr {
    fn value_len(&self) -> usize {
        match self {
            PortAttr::Ifindex(_) | PortAttr::Speed(_) => 4,
            PortAttr::Duplex(_) => 1,
            PortAttr::Changed | PortAttr::LinkUp | PortAttr::Removed => 0,
            PortAttr::Other(nla) => nla.value_len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            PortAttr::Ifindex(_) => TEAM_ATTR_PORT_IFINDEX,
            PortAttr::Changed => TEAM_ATTR_PORT_CHANGED,
            PortAttr::LinkUp => TEAM_ATTR_PORT_LINKUP,
            PortAttr::Speed(_) => TEAM_ATTR_PORT_SPEED,
            PortAttr::Duplex(_) => TEAM_ATTR_PORT_DUPLEX,
            PortAttr::Removed => TEAM_ATTR_PORT_REMOVED,
            PortAttr::Other(nla) => nla.kind(),
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            PortAttr::Ifindex(value) | PortAttr::Speed(value) => {
                NativeEndian::write_u32(buffer, *value)
            }
            PortAttr::Duplex(value) => buffer[0] = *value,
            PortAttr::Changed | PortAttr::LinkUp | PortAttr::Removed => {}
            PortAttr::Other(nla) => nla.emit_value(buffer),
        }
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for PortAttr {
    fn parse(buf: &NlaBuffer<&'a T>) -> std::result::Result<Self, DecodeError> {
        let payload = buf.value();
        Ok(match buf.kind() {
            TEAM_ATTR_PORT_IFINDEX => PortAttr::Ifindex(
                parse_u32(payload)
                    .map_err(|e| format!("invalid TEAM_ATTR_PORT_IFINDEX value: {}", e))?,
            ),
            TEAM_ATTR_PORT_CHANGED => PortAttr::Changed,
            TEAM_ATTR_PORT_LINKUP => PortAttr::LinkUp,
            TEAM_ATTR_PORT_SPEED => PortAttr::Speed(
                parse_u32(payload)
                    .map_err(|e| format!("invalid TEAM_ATTR_PORT_SPEED value: {}", e))?,
            ),
            TEAM_ATTR_PORT_DUPLEX => PortAttr::Duplex(
                parse_u8(payload)
                    .map_err(|e| format!("invalid TEAM_ATTR_PORT_DUPLEX value: {}", e))?,
            ),
            TEAM_ATTR_PORT_REMOVED => PortAttr::Removed,
            _ => PortAttr::Other(DefaultNla::parse(buf)?),
        })
    }
}

/// One nested port item of `TEAM_ATTR_LIST_PORT`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortItem {
    pub attrs: Vec<PortAttr>,
}

impl PortItem {
    pub fn new(attrs: Vec<PortAttr>) -> Self {
        Self { attrs }
    }

    pub fn ifindex(&self) -> Option<u32> {
        self.attrs.iter().find_map(|attr| match attr {
            PortAttr::Ifindex(ifindex) => Some(*ifindex),
            _ => None,
        })
    }

    /// Marker attributes carry no payload, presence is the value
    pub fn has_marker(&self, kind: u16) -> bool {
        self.attrs.iter().any(|attr| attr.kind() == kind)
    }

    pub fn speed(&self) -> Option<u32> {
        self.attrs.iter().find_map(|attr| match attr {
            PortAttr::Speed(speed) => Some(*speed),
            _ => None,
        })
    }

    pub fn duplex(&self) -> Option<u8> {
        self.attrs.iter().find_map(|attr| match attr {
            PortAttr::Duplex(duplex) => Some(*duplex),
            _ => None,
        })
    }
}

impl Nla for PortItem {
    fn value_len(&self) -> usize {
        self.attrs.as_slice().buffer_len()
    }

    fn kind(&self) -> u16 {
        TEAM_ATTR_ITEM_PORT
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        self.attrs.as_slice().emit(buffer)
    }

    fn is_nested(&self) -> bool {
        true
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for PortItem {
    fn parse(buf: &NlaBuffer<&'a T>) -> std::result::Result<Self, DecodeError> {
        let mut attrs = Vec::new();
        for nla in NlasIterator::new(buf.value()) {
            let nla = nla.map_err(|e| format!("failed to parse nested port attribute: {}", e))?;
            attrs.push(PortAttr::parse(&nla)?);
        }
        Ok(Self { attrs })
    }
}

/// Top-level team attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamAttr {
    TeamIfindex(u32),
    ListPort(Vec<PortItem>),
    Other(DefaultNla),
}

impl Nla for TeamAttr {
    fn value_len(&self) -> usize {
        match self {
            TeamAttr::TeamIfindex(_) => 4,
            TeamAttr::ListPort(items) => items.as_slice().buffer_len(),
            TeamAttr::Other(nla) => nla.value_len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            TeamAttr::TeamIfindex(_) => TEAM_ATTR_TEAM_IFINDEX,
            TeamAttr::ListPort(_) => TEAM_ATTR_LIST_PORT,
            TeamAttr::Other(nla) => nla.kind(),
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            TeamAttr::TeamIfindex(value) => NativeEndian::write_u32(buffer, *value),
            TeamAttr::ListPort(items) => items.as_slice().emit(buffer),
            TeamAttr::Other(nla) => nla.emit_value(buffer),
        }
    }

    fn is_nested(&self) -> bool {
        matches!(self, TeamAttr::ListPort(_))
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for TeamAttr {
    fn parse(buf: &NlaBuffer<&'a T>) -> std::result::Result<Self, DecodeError> {
        let payload = buf.value();
        Ok(match buf.kind() {
            TEAM_ATTR_TEAM_IFINDEX => TeamAttr::TeamIfindex(
                parse_u32(payload)
                    .map_err(|e| format!("invalid TEAM_ATTR_TEAM_IFINDEX value: {}", e))?,
            ),
            TEAM_ATTR_LIST_PORT => {
                let mut items = Vec::new();
                for nla in NlasIterator::new(payload) {
                    let nla = nla.map_err(|e| format!("failed to parse port list item: {}", e))?;
                    items.push(PortItem::parse(&nla)?);
                }
                TeamAttr::ListPort(items)
            }
            _ => TeamAttr::Other(DefaultNla::parse(buf)?),
        })
    }
}

/// Team generic netlink message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamMessage {
    pub cmd: TeamCmd,
    pub attrs: Vec<TeamAttr>,
}

impl TeamMessage {
    /// Snapshot request for the port list of one team device
    pub fn port_list_get(team_ifindex: u32) -> Self {
        Self {
            cmd: TeamCmd::PortListGet,
            attrs: vec![TeamAttr::TeamIfindex(team_ifindex)],
        }
    }

    /// Port list reply as the kernel sends it
    pub fn port_list(team_ifindex: u32, items: Vec<PortItem>) -> Self {
        Self {
            cmd: TeamCmd::PortListGet,
            attrs: vec![
                TeamAttr::TeamIfindex(team_ifindex),
                TeamAttr::ListPort(items),
            ],
        }
    }

    pub fn team_ifindex(&self) -> Option<u32> {
        self.attrs.iter().find_map(|attr| match attr {
            TeamAttr::TeamIfindex(ifindex) => Some(*ifindex),
            _ => None,
        })
    }

    pub fn port_items(&self) -> Option<&[PortItem]> {
        self.attrs.iter().find_map(|attr| match attr {
            TeamAttr::ListPort(items) => Some(items.as_slice()),
            _ => None,
        })
    }

    /// Serialize attributes into a generic netlink payload (without genl header)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; self.buffer_len()];
        self.emit(&mut buffer);
        buffer
    }

    /// Decode a generic netlink payload (without genl header)
    pub fn from_bytes(cmd: u8, payload: &[u8]) -> Result<Self> {
        let header = GenlHeader {
            cmd,
            version: TEAM_GENL_VERSION,
        };
        Self::parse_with_param(payload, header)
            .map_err(|e| TeamdError::Protocol(format!("Failed to decode team message: {}", e)))
    }
}

impl GenlFamily for TeamMessage {
    fn family_name() -> &'static str {
        TEAM_GENL_NAME
    }

    fn command(&self) -> u8 {
        self.cmd.into()
    }

    fn version(&self) -> u8 {
        TEAM_GENL_VERSION
    }
}

impl Emitable for TeamMessage {
    fn buffer_len(&self) -> usize {
        self.attrs.as_slice().buffer_len()
    }

    fn emit(&self, buffer: &mut [u8]) {
        self.attrs.as_slice().emit(buffer)
    }
}

impl ParseableParametrized<[u8], GenlHeader> for TeamMessage {
    fn parse_with_param(
        buf: &[u8],
        header: GenlHeader,
    ) -> std::result::Result<Self, DecodeError> {
        let mut attrs = Vec::new();
        for nla in NlasIterator::new(buf) {
            let nla = nla.map_err(|e| format!("failed to parse team attribute: {}", e))?;
            attrs.push(TeamAttr::parse(&nla)?);
        }
        Ok(Self {
            cmd: header.cmd.into(),
            attrs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(ifindex: u32) -> PortItem {
        PortItem::new(vec![
            PortAttr::Ifindex(ifindex),
            PortAttr::LinkUp,
            PortAttr::Speed(1000),
            PortAttr::Duplex(1),
        ])
    }

    #[test]
    fn test_port_list_get_request() {
        let msg = TeamMessage::port_list_get(7);
        assert_eq!(msg.command(), TEAM_CMD_PORT_LIST_GET);
        assert_eq!(msg.version(), TEAM_GENL_VERSION);
        assert_eq!(TeamMessage::family_name(), "team");
        // one u32 attribute: 4 byte header + 4 byte value
        assert_eq!(msg.to_bytes().len(), 8);
    }

    #[test]
    fn test_decode_port_list_reply() {
        let reply = TeamMessage::port_list(3, vec![port(5), port(6)]);
        let decoded = TeamMessage::from_bytes(TEAM_CMD_PORT_LIST_GET, &reply.to_bytes()).unwrap();
        assert_eq!(decoded, reply);
        assert_eq!(decoded.team_ifindex(), Some(3));
        let items = decoded.port_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].ifindex(), Some(6));
        assert!(items[0].has_marker(TEAM_ATTR_PORT_LINKUP));
        assert!(!items[0].has_marker(TEAM_ATTR_PORT_REMOVED));
        assert_eq!(items[0].speed(), Some(1000));
        assert_eq!(items[0].duplex(), Some(1));
    }

    #[test]
    fn test_marker_has_no_payload() {
        let item = PortItem::new(vec![PortAttr::Removed]);
        // nested header + flag header only
        assert_eq!(item.buffer_len(), 8);
    }

    #[test]
    fn test_missing_port_list() {
        let msg = TeamMessage {
            cmd: TeamCmd::PortListGet,
            attrs: vec![TeamAttr::TeamIfindex(3)],
        };
        let decoded = TeamMessage::from_bytes(TEAM_CMD_PORT_LIST_GET, &msg.to_bytes()).unwrap();
        assert!(decoded.port_items().is_none());
    }

    #[test]
    fn test_unknown_attribute_is_preserved() {
        let mut bytes = TeamMessage::port_list(3, vec![port(5)]).to_bytes();
        // u32 attribute of kind 42
        bytes.extend_from_slice(&[8, 0, 42, 0, 1, 0, 0, 0]);
        let decoded = TeamMessage::from_bytes(TEAM_CMD_PORT_LIST_GET, &bytes).unwrap();
        assert_eq!(decoded.attrs.len(), 3);
        assert!(matches!(decoded.attrs[2], TeamAttr::Other(ref nla) if nla.kind() == 42));
    }

    #[test]
    fn test_truncated_speed_is_protocol_error() {
        let mut bytes = TeamMessage::port_list(3, vec![PortItem::new(vec![PortAttr::Ifindex(5)])])
            .to_bytes();
        // append a port item whose speed attribute carries 2 bytes instead of 4
        let bad_item: [u8; 12] = [12, 0, 1, 0x80, 6, 0, 4, 0, 0xe8, 0x03, 0, 0];
        let list_len = NativeEndian::read_u16(&bytes[8..10]) + bad_item.len() as u16;
        NativeEndian::write_u16(&mut bytes[8..10], list_len);
        bytes.extend_from_slice(&bad_item);
        let err = TeamMessage::from_bytes(TEAM_CMD_PORT_LIST_GET, &bytes).unwrap_err();
        assert!(matches!(err, TeamdError::Protocol(_)));
    }

    #[test]
    fn test_cmd_conversion() {
        assert_eq!(TeamCmd::from(3), TeamCmd::PortListGet);
        assert_eq!(TeamCmd::from(2), TeamCmd::OptionsGet);
        assert_eq!(u8::from(TeamCmd::OptionsSet), TEAM_CMD_OPTIONS_SET);
        assert_eq!(u8::from(TeamCmd::Other(9)), 9);
    }
}
