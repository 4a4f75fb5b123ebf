//! DCB lifecycle state machine.
//!
//! Grounded on `dcb_set_state_nomutex` in the original `dcb.c`. The two
//! open questions the source left implicit are resolved explicitly here
//! (see SPEC_FULL.md §9): `nopolling -> polling` and `zombie -> polling`
//! both succeed as no-ops, modelling `dcb_close`'s idempotence.

use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum DcbState {
    Undefined,
    Alloc,
    Polling,
    Listening,
    Nopolling,
    Zombie,
    Disconnected,
    Freed,
}

impl DcbState {
    /// Attempt to move from `self` to `new_state`. Returns `true` if the
    /// transition is legal, `false` otherwise — never panics, since an
    /// illegal transition is a caller programming error the spec requires
    /// we log and reject rather than corrupt state over.
    ///
    /// A `true` result with `self == new_state` on return is a valid
    /// idempotent no-op, not an error: `nopolling -> polling` and
    /// `zombie -> polling` are both accepted but leave the state unchanged.
    fn next(self, new_state: DcbState) -> Option<DcbState> {
        use DcbState::*;
        match (self, new_state) {
            (Undefined, _) => Some(new_state),
            (Alloc, Polling) | (Alloc, Listening) | (Alloc, Disconnected) => Some(new_state),
            (Polling, Nopolling) | (Polling, Listening) => Some(new_state),
            (Listening, Polling) => Some(new_state),
            (Nopolling, Zombie) => Some(new_state),
            (Nopolling, Polling) => Some(Nopolling),
            (Zombie, Disconnected) => Some(new_state),
            (Zombie, Polling) => Some(Zombie),
            (Disconnected, Freed) => Some(new_state),
            _ => None,
        }
    }
}

/// A DCB's state guarded by its `init_lock`. All transitions go through
/// [`StateCell::set_state`], which is the only place `DcbState` ever
/// changes.
#[derive(Debug)]
pub struct StateCell {
    inner: std::sync::Mutex<DcbState>,
}

impl StateCell {
    pub fn new(initial: DcbState) -> Self {
        Self {
            inner: std::sync::Mutex::new(initial),
        }
    }

    pub fn get(&self) -> DcbState {
        *self.inner.lock().unwrap()
    }

    /// Attempt the transition under `init_lock`. Returns `(success,
    /// previous_state)`, matching `dcb_set_state`'s `(bool, dcb_state_t*)`
    /// signature. `fd` is only used for the log line on failure.
    pub fn set_state(&self, new_state: DcbState, fd: i32) -> (bool, DcbState) {
        let mut guard = self.inner.lock().unwrap();
        let prev = *guard;
        match prev.next(new_state) {
            Some(resolved) => {
                *guard = resolved;
                trace!(fd, from = ?prev, to = ?resolved, "dcb state transition");
                (true, prev)
            }
            None => {
                warn!(fd, from = ?prev, to = ?new_state, "illegal dcb state transition rejected");
                (false, prev)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DcbState::*;

    #[test]
    fn alloc_to_polling_succeeds() {
        let cell = StateCell::new(Alloc);
        let (ok, prev) = cell.set_state(Polling, 1);
        assert!(ok);
        assert_eq!(prev, Alloc);
        assert_eq!(cell.get(), Polling);
    }

    #[test]
    fn illegal_transition_is_rejected_and_state_unchanged() {
        let cell = StateCell::new(Alloc);
        let (ok, prev) = cell.set_state(Zombie, 1);
        assert!(!ok);
        assert_eq!(prev, Alloc);
        assert_eq!(cell.get(), Alloc, "rejected transition must not corrupt state");
    }

    #[test]
    fn nopolling_to_polling_is_idempotent_noop() {
        let cell = StateCell::new(Nopolling);
        let (ok, prev) = cell.set_state(Polling, 1);
        assert!(ok);
        assert_eq!(prev, Nopolling);
        assert_eq!(cell.get(), Nopolling, "state must remain nopolling");
    }

    #[test]
    fn zombie_to_polling_is_idempotent_noop() {
        let cell = StateCell::new(Zombie);
        let (ok, prev) = cell.set_state(Polling, 1);
        assert!(ok);
        assert_eq!(cell.get(), Zombie);
    }

    #[test]
    fn full_lifecycle_path() {
        let cell = StateCell::new(Alloc);
        assert!(cell.set_state(Polling, 1).0);
        assert!(cell.set_state(Nopolling, 1).0);
        assert!(cell.set_state(Zombie, 1).0);
        assert!(cell.set_state(Disconnected, 1).0);
        assert!(cell.set_state(Freed, 1).0);
        assert_eq!(cell.get(), Freed);
    }

    #[test]
    fn freed_is_terminal() {
        let cell = StateCell::new(Freed);
        let (ok, _) = cell.set_state(Alloc, 1);
        assert!(!ok);
        assert_eq!(cell.get(), Freed);
    }

    #[test]
    fn listening_polling_round_trip() {
        let cell = StateCell::new(Alloc);
        assert!(cell.set_state(Listening, 1).0);
        assert!(cell.set_state(Polling, 1).0);
        assert!(cell.set_state(Listening, 1).0);
    }

    #[test]
    fn undefined_accepts_any_as_bootstrap_only() {
        let cell = StateCell::new(Undefined);
        assert!(cell.set_state(Zombie, 1).0);
    }
}
