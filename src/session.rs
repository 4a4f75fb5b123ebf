//! Session collaborator interface.
//!
//! The router/session layer itself is out of scope (§1): a DCB holds a
//! shared, non-owning reference to a [`Session`] (the cyclic-back-pointer
//! redesign from SPEC_FULL.md §9 — the session owns its DCBs, the DCB only
//! borrows the session). The core only needs three things from it: a way
//! to link a freshly-connected/accepted DCB to its session, a way to take
//! and close the router session exactly once, and reference release on
//! final free.

use std::sync::Arc;

/// A handle to the router-private session object. `close` corresponds to
/// `service->router->closeSession(router_instance, rsession)` in the
/// original; it is invoked by the reclaimer at most once, after the
/// `(router_instance, router_session)` pair has already been swapped to
/// null under the session's own latch (see [`Session::take_router_session`]).
pub trait RouterSessionHandle: Send + Sync {
    fn close(&self);
}

/// Outcome of [`Session::link_dcb`]: the session may have already been
/// torn down by the time a DCB tries to join it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    SessionRemoved,
}

pub trait Session: Send + Sync {
    /// Link `dcb_fd` to this session. Mirrors `session_link_dcb`.
    fn link_dcb(&self, dcb_fd: i32) -> LinkOutcome;

    /// Atomically take the router session handle, leaving the internal
    /// pointer null, under the session's own lock. Returns `None` if it
    /// has already been taken — this is what makes the reclaimer's
    /// final-free step double-close-safe even if reached twice.
    fn take_router_session(&self) -> Option<Box<dyn RouterSessionHandle>>;

    /// Reference-count release, called once per DCB that held a reference
    /// to this session, from the reclaimer's final-free step.
    fn release(self: Arc<Self>);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub struct CountingHandle(pub Arc<AtomicUsize>);

    impl RouterSessionHandle for CountingHandle {
        fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A session double that allows exactly one `take_router_session` and
    /// counts releases, for exercising the "reclaim cannot double-close"
    /// property from §8 invariant 4.
    pub struct TestSession {
        pub taken: AtomicBool,
        pub close_count: Arc<AtomicUsize>,
        pub release_count: Arc<AtomicUsize>,
        pub removed: bool,
    }

    impl TestSession {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                taken: AtomicBool::new(false),
                close_count: Arc::new(AtomicUsize::new(0)),
                release_count: Arc::new(AtomicUsize::new(0)),
                removed: false,
            })
        }

        pub fn removed_session() -> Arc<Self> {
            Arc::new(Self {
                taken: AtomicBool::new(false),
                close_count: Arc::new(AtomicUsize::new(0)),
                release_count: Arc::new(AtomicUsize::new(0)),
                removed: true,
            })
        }
    }

    impl Session for TestSession {
        fn link_dcb(&self, _dcb_fd: i32) -> LinkOutcome {
            if self.removed {
                LinkOutcome::SessionRemoved
            } else {
                LinkOutcome::Linked
            }
        }

        fn take_router_session(&self) -> Option<Box<dyn RouterSessionHandle>> {
            if self.taken.swap(true, Ordering::SeqCst) {
                None
            } else {
                Some(Box::new(CountingHandle(self.close_count.clone())))
            }
        }

        fn release(self: Arc<Self>) {
            self.release_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn take_router_session_is_exactly_once() {
        let session = TestSession::new();
        let first = session.take_router_session();
        let second = session.take_router_session();
        assert!(first.is_some());
        assert!(second.is_none());
        first.unwrap().close();
        assert_eq!(session.close_count.load(Ordering::SeqCst), 1);
    }
}
