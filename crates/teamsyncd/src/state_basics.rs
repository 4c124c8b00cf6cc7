//! Basic state items every daemon instance exposes
//!
//! Global items live under `setup/`, per-port items under
//! `ports/<ifindex>/`.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::info;

use crate::error::{Result, TeamdError};
use crate::ports::DUPLEX_FULL;
use crate::state::{StateVal, StateValue};
use crate::team::Teamd;

/// Daemon-level data the basic items read and write
#[derive(Debug, Default)]
pub struct StateBasics {
    debug_level: AtomicI64,
}

impl StateBasics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug_level(&self) -> i64 {
        self.debug_level.load(Ordering::Relaxed)
    }

    pub fn set_debug_level(&self, level: i64) -> Result<()> {
        if level < 0 {
            return Err(TeamdError::Validation(format!(
                "debug level {} is negative",
                level
            )));
        }
        self.debug_level.store(level, Ordering::Relaxed);
        info!(level, "Debug level changed");
        Ok(())
    }
}

fn setup_vals() -> StateVal<StateBasics> {
    StateVal::node(
        "setup",
        vec![
            StateVal::int("team_ifindex", |_, ctx| Ok(i64::from(ctx.team().ifindex()))),
            StateVal::int("debug_level", |basics: &StateBasics, _| {
                Ok(basics.debug_level())
            })
            .with_setter(|basics: &StateBasics, _, value: StateValue| match value {
                StateValue::Int(level) => basics.set_debug_level(level),
                other => Err(TeamdError::Type(format!(
                    "debug level must be int, got {}",
                    other.kind()
                ))),
            }),
            StateVal::int("port_count", |_, ctx| {
                Ok(i64::try_from(ctx.team().ports().len()).unwrap_or(i64::MAX))
            }),
        ],
    )
}

fn duplex_name(duplex: u8) -> &'static str {
    if duplex == DUPLEX_FULL { "full" } else { "half" }
}

fn port_vals() -> Vec<StateVal<StateBasics>> {
    vec![
        StateVal::int("ifindex", |_, ctx| Ok(i64::from(ctx.port()?.ifindex()))).per_port(),
        StateVal::node(
            "link",
            vec![
                StateVal::bool("up", |_, ctx| Ok(ctx.port()?.is_link_up())),
                StateVal::int("speed", |_, ctx| Ok(i64::from(ctx.port()?.speed()))),
                StateVal::string("duplex", |_, ctx| {
                    Ok(duplex_name(ctx.port()?.duplex()).to_string())
                }),
            ],
        )
        .per_port(),
        StateVal::bool("changed", |_, ctx| Ok(ctx.port()?.is_changed())).per_port(),
        StateVal::bool("removed", |_, ctx| Ok(ctx.port()?.is_removed())).per_port(),
        StateVal::bool("present", |_, ctx| {
            let port = ctx.port()?;
            Ok(ctx.team().is_port_present(port))
        })
        .per_port(),
    ]
}

/// Registered basic items; unregister with the same value
pub struct BasicsRegistration {
    data: Arc<StateBasics>,
    vals: Vec<StateVal<StateBasics>>,
}

impl BasicsRegistration {
    /// Register the global and per-port basic items
    pub fn register(teamd: &mut Teamd, data: Arc<StateBasics>) -> Result<Self> {
        let mut vals = vec![setup_vals()];
        vals.extend(port_vals());

        for (pos, val) in vals.iter().enumerate() {
            if let Err(e) = teamd.state_register(val, &data, None, None) {
                for registered in &vals[..pos] {
                    teamd.state_unregister(registered, &data);
                }
                return Err(e);
            }
        }
        Ok(Self { data, vals })
    }

    pub fn data(&self) -> &Arc<StateBasics> {
        &self.data
    }

    pub fn unregister(self, teamd: &mut Teamd) {
        for val in &self.vals {
            teamd.state_unregister(val, &self.data);
        }
    }
}
