//! Team Port Synchronization Daemon
//!
//! Mirrors the ports of a kernel team device into an in-memory port store by
//! reconciling against the `team` generic netlink family, and exposes team
//! and port state through a hierarchical, path-addressed state registry.

pub mod attrs;
pub mod change;
pub mod config_file;
pub mod error;
pub mod ifinfo;
pub mod ifinfo_watch;
pub mod ports;
pub mod reconcile;
pub mod state;
pub mod state_basics;
pub mod team;
pub mod transport;

pub use attrs::{PortAttr, PortItem, TeamAttr, TeamCmd, TeamMessage};
pub use change::{ChangeHandler, ChangeNotifier, ChangeTypeMask, HandlerId};
pub use config_file::{DEFAULT_CONFIG_PATH, TeamsyncConfig};
pub use error::*;
pub use ifinfo::{Ifinfo, IfinfoList};
pub use ifinfo_watch::{IfinfoWatch, SYS_CLASS_NET};
pub use ports::{DUPLEX_FULL, Port, PortStore};
pub use reconcile::{PortReconciler, PortUpdate, apply_messages, apply_pass};
pub use state::{StateCtx, StateKind, StateRegistry, StateVal, StateValue};
pub use state_basics::{BasicsRegistration, StateBasics};
pub use team::{SharedTeamd, Team, Teamd};
#[cfg(target_os = "linux")]
pub use transport::GenlTransport;
pub use transport::{ReplayTransport, TeamTransport};
