//! Zombie list and reclaimer: the deferred-free queue drained by every
//! polling worker once per poll cycle. Grounded on
//! `dcb_add_to_zombieslist`/`dcb_process_zombies`/`dcb_final_free` in the
//! original `dcb.c`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::dcb::Dcb;
use crate::poller::Poller;
use crate::registry::Registry;
use crate::state::DcbState;

#[derive(Default)]
pub struct ZombieList {
    zombies: Mutex<Vec<Arc<Dcb>>>,
    /// Best-effort count used only for the dirty pre-latch emptiness check
    /// in [`ZombieList::process`] — never authoritative, mirrors the
    /// original's `if (zombies == NULL) return;` fast path.
    count_hint: AtomicUsize,
}

impl ZombieList {
    pub fn new() -> Self {
        Self { zombies: Mutex::new(Vec::new()), count_hint: AtomicUsize::new(0) }
    }

    /// Enqueue `dcb` at the tail unless it is already a zombie (single
    /// membership check — see SPEC_FULL.md §9, resolved open question 3),
    /// then transition it to `zombie`.
    pub(crate) fn add_to_zombies(&self, dcb: Arc<Dcb>) {
        if !dcb.is_zombie() {
            self.zombies.lock().unwrap().push(dcb.clone());
            self.count_hint.fetch_add(1, Ordering::Relaxed);
            debug!(fd = dcb.fd(), "dcb added to zombie list");
        }
        dcb.mark_zombie();
    }

    pub fn len(&self) -> usize {
        self.zombies.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one worker's share of the reclamation protocol (§4.7).
    pub fn process_zombies(&self, worker_id: usize, registry: &Registry) {
        if self.count_hint.load(Ordering::Relaxed) == 0 {
            return;
        }

        let mut victims = Vec::new();
        {
            let mut guard = self.zombies.lock().unwrap();
            let mut i = 0;
            while i < guard.len() {
                if guard[i].clear_worker_bit(worker_id) {
                    victims.push(guard.remove(i));
                    self.count_hint.fetch_sub(1, Ordering::Relaxed);
                } else {
                    i += 1;
                }
            }
        }

        for dcb in victims {
            finalize(dcb, registry);
        }
    }
}

/// Top-level orchestration for `close(dcb)`: per-DCB mechanics
/// ([`Dcb::begin_close`]) plus, if this was genuinely the first close,
/// zombie-list enqueue.
pub fn close_dcb(dcb: &Arc<Dcb>, poller: &dyn Poller, zombies: &ZombieList) {
    if dcb.begin_close(poller) {
        zombies.add_to_zombies(dcb.clone());
    }
}

/// Final-free a DCB that every live worker has cleared its bit for: close
/// the fd at OS level, unlink from the global list, release the session,
/// and transition to `disconnected` then `freed`.
fn finalize(dcb: Arc<Dcb>, registry: &Registry) {
    let fd = dcb.fd();
    if fd >= 0 {
        let rc = unsafe { libc::close(fd) };
        if rc != 0 {
            warn!(fd, error = %std::io::Error::last_os_error(), "close(2) failed during final free");
        }
    }
    dcb.mark_disconnected();
    registry.unlink(&dcb);

    if let Some(session) = dcb.take_session() {
        if let Some(handle) = session.take_router_session() {
            handle.close();
        }
        session.release();
    }

    dcb.mark_freed();
    info!(fd, state = ?dcb.state(), "dcb finally freed");
    debug_assert_eq!(dcb.state(), DcbState::Freed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmask::Bitmask;
    use crate::dcb::DcbRole;
    use crate::protocol::echo::EchoProtocol;
    use crate::session::test_support::TestSession;
    use crate::state::DcbState;
    use std::sync::atomic::{AtomicBool, Ordering as AOrdering};

    struct FakePoller {
        live: Bitmask,
        removed: AtomicBool,
    }

    impl Poller for FakePoller {
        fn add(&self, _dcb: &Dcb) -> crate::error::DcbResult<()> {
            Ok(())
        }
        fn remove(&self, _dcb: &Dcb) -> crate::error::DcbResult<()> {
            self.removed.store(true, AOrdering::SeqCst);
            Ok(())
        }
        fn live_workers(&self) -> Bitmask {
            self.live
        }
    }

    fn dcb_with_session() -> (Arc<Dcb>, Arc<TestSession>) {
        let dcb = Dcb::new(DcbRole::RequestHandler, Arc::new(EchoProtocol::new()));
        dcb.set_fd(42);
        dcb.set_state(DcbState::Polling);
        let session = TestSession::new();
        dcb.set_session(session.clone());
        (dcb, session)
    }

    #[test]
    fn single_worker_close_reclaims_immediately() {
        let registry = Registry::new();
        let zombies = ZombieList::new();
        let (dcb, session) = dcb_with_session();
        registry.track(dcb.clone());
        let poller = FakePoller { live: Bitmask::from_ids([0]), removed: AtomicBool::new(false) };

        close_dcb(&dcb, &poller, &zombies);
        assert!(poller.removed.load(AOrdering::SeqCst));
        assert_eq!(zombies.len(), 1);

        zombies.process_zombies(0, &registry);
        assert!(zombies.is_empty());
        assert_eq!(dcb.state(), DcbState::Freed);
        assert_eq!(session.release_count.load(AOrdering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn second_worker_must_also_clear_before_reclaim() {
        let registry = Registry::new();
        let zombies = ZombieList::new();
        let (dcb, _session) = dcb_with_session();
        registry.track(dcb.clone());
        let poller = FakePoller { live: Bitmask::from_ids([0, 1]), removed: AtomicBool::new(false) };

        close_dcb(&dcb, &poller, &zombies);
        zombies.process_zombies(0, &registry);
        assert_eq!(zombies.len(), 1, "worker 1 has not cleared its bit yet");
        assert_eq!(dcb.state(), DcbState::Zombie);

        zombies.process_zombies(1, &registry);
        assert!(zombies.is_empty());
        assert_eq!(dcb.state(), DcbState::Freed);
    }

    #[test]
    fn double_close_does_not_reenqueue_or_touch_bitmask() {
        let registry = Registry::new();
        let zombies = ZombieList::new();
        let (dcb, _session) = dcb_with_session();
        registry.track(dcb.clone());
        let poller = FakePoller { live: Bitmask::from_ids([0]), removed: AtomicBool::new(false) };

        close_dcb(&dcb, &poller, &zombies);
        assert_eq!(zombies.len(), 1);
        close_dcb(&dcb, &poller, &zombies);
        assert_eq!(zombies.len(), 1, "second close must be a no-op, not a second enqueue");
    }
}
