//! Change notification fan-out
//!
//! Subscribers register a handler together with the change types they care
//! about. A reconciliation pass marks its change type pending and dispatches
//! once it has been fully applied; handlers learn *that* something changed,
//! not *what*, and re-read the port store for details.

use std::fmt;
use std::ops::{BitAnd, BitOr};

use tracing::{debug, warn};

use crate::error::{Result, TeamdError};
use crate::team::Team;

/// Set of change types
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangeTypeMask(u32);

impl ChangeTypeMask {
    pub const NONE: ChangeTypeMask = ChangeTypeMask(0);
    pub const PORT: ChangeTypeMask = ChangeTypeMask(1 << 0);
    pub const OPTION: ChangeTypeMask = ChangeTypeMask(1 << 1);
    pub const IFINFO: ChangeTypeMask = ChangeTypeMask(1 << 2);
    pub const ALL: ChangeTypeMask = ChangeTypeMask(0b111);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ChangeTypeMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: ChangeTypeMask) -> bool {
        self.0 & other.0 != 0
    }

    fn remove(&mut self, other: ChangeTypeMask) {
        self.0 &= !other.0;
    }
}

impl BitOr for ChangeTypeMask {
    type Output = ChangeTypeMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ChangeTypeMask(self.0 | rhs.0)
    }
}

impl BitAnd for ChangeTypeMask {
    type Output = ChangeTypeMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        ChangeTypeMask(self.0 & rhs.0)
    }
}

/// Handle returned by [`ChangeNotifier::register`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Change handler; receives the team state and the change types that fired
pub type ChangeHandler = Box<dyn FnMut(&Team, ChangeTypeMask) -> Result<()> + Send>;

struct Registration {
    id: HandlerId,
    type_mask: ChangeTypeMask,
    handler: ChangeHandler,
}

/// Registered change handlers and pending change types
#[derive(Default)]
pub struct ChangeNotifier {
    handlers: Vec<Registration>,
    pending: ChangeTypeMask,
    next_id: u64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_mask: ChangeTypeMask, handler: ChangeHandler) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.push(Registration {
            id,
            type_mask,
            handler,
        });
        debug!(handler = %id, "Registered change handler");
        id
    }

    /// Returns false if the handler was not registered
    pub fn unregister(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|reg| reg.id != id);
        before != self.handlers.len()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn pending(&self) -> ChangeTypeMask {
        self.pending
    }

    pub fn set_pending(&mut self, type_mask: ChangeTypeMask) {
        self.pending = self.pending | type_mask;
    }

    /// Call handlers for pending types within `call_mask`
    ///
    /// The pending bits are consumed before any handler runs. The first
    /// failing handler stops the fan-out and its error is returned.
    pub fn dispatch(&mut self, team: &Team, call_mask: ChangeTypeMask) -> Result<()> {
        let fired = self.pending & call_mask;
        if fired.is_empty() {
            return Ok(());
        }
        self.pending.remove(fired);

        for reg in self.handlers.iter_mut() {
            let matched = reg.type_mask & fired;
            if matched.is_empty() {
                continue;
            }
            if let Err(e) = (reg.handler)(team, matched) {
                warn!(handler = %reg.id, error = %e, "Change handler failed");
                return Err(TeamdError::Handler(format!("handler {}: {}", reg.id, e)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> ChangeHandler {
        let counter = Arc::clone(counter);
        Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_mask_operations() {
        let mask = ChangeTypeMask::PORT | ChangeTypeMask::IFINFO;
        assert!(mask.contains(ChangeTypeMask::PORT));
        assert!(!mask.contains(ChangeTypeMask::OPTION));
        assert!(mask.intersects(ChangeTypeMask::ALL));
        assert!((mask & ChangeTypeMask::OPTION).is_empty());
    }

    #[test]
    fn test_dispatch_only_pending() {
        let team = Team::new(3);
        let mut notifier = ChangeNotifier::new();
        let calls = Arc::new(AtomicUsize::new(0));
        notifier.register(ChangeTypeMask::PORT, counting(&calls));

        notifier.dispatch(&team, ChangeTypeMask::PORT).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        notifier.set_pending(ChangeTypeMask::PORT);
        notifier.dispatch(&team, ChangeTypeMask::PORT).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(notifier.pending().is_empty());

        notifier.dispatch(&team, ChangeTypeMask::PORT).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_respects_type_mask() {
        let team = Team::new(3);
        let mut notifier = ChangeNotifier::new();
        let port_calls = Arc::new(AtomicUsize::new(0));
        let option_calls = Arc::new(AtomicUsize::new(0));
        notifier.register(ChangeTypeMask::PORT, counting(&port_calls));
        notifier.register(ChangeTypeMask::OPTION, counting(&option_calls));

        notifier.set_pending(ChangeTypeMask::PORT);
        notifier.dispatch(&team, ChangeTypeMask::ALL).unwrap();
        assert_eq!(port_calls.load(Ordering::SeqCst), 1);
        assert_eq!(option_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregister() {
        let team = Team::new(3);
        let mut notifier = ChangeNotifier::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = notifier.register(ChangeTypeMask::PORT, counting(&calls));
        assert!(notifier.unregister(id));
        assert!(!notifier.unregister(id));
        assert!(notifier.is_empty());

        notifier.set_pending(ChangeTypeMask::PORT);
        notifier.dispatch(&team, ChangeTypeMask::PORT).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_handler_stops_fan_out() {
        let team = Team::new(3);
        let mut notifier = ChangeNotifier::new();
        let calls = Arc::new(AtomicUsize::new(0));
        notifier.register(
            ChangeTypeMask::PORT,
            Box::new(|_, _| Err(TeamdError::Validation("bad".to_string()))),
        );
        notifier.register(ChangeTypeMask::PORT, counting(&calls));

        notifier.set_pending(ChangeTypeMask::PORT);
        let err = notifier.dispatch(&team, ChangeTypeMask::PORT).unwrap_err();
        assert!(matches!(err, TeamdError::Handler(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
