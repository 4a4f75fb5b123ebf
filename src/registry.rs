//! Global DCB registry: the set of all non-freed DCBs, guarded by a single
//! latch, used for allocation bookkeeping and lock-minimal diagnostics.
//! Grounded on `allDCBs`/`dcb_count_by_usage`/`dprintAllDCBs` in the
//! original `dcb.c`; replaced here with an external `Vec<Arc<Dcb>>` rather
//! than the original's intrusive `next` pointer, per the redesign note in
//! SPEC_FULL.md §9.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{trace, warn};

use crate::dcb::{Dcb, DcbRole, DcbSnapshot};
use crate::error::{DcbError, DcbResult};
use crate::poller::Poller;
use crate::protocol::{Protocol, ProtocolRegistry, ServerRef};
use crate::session::{LinkOutcome, Session};
use crate::state::DcbState;

pub struct Registry {
    dcbs: Mutex<Vec<Arc<Dcb>>>,
    /// Read-path segment cap applied to every DCB this registry produces,
    /// threaded down from `ProxyConfig::max_segment` (§10.3). Defaults to
    /// `dcb::MAX_SEGMENT` when the registry is built with `new()`.
    max_segment: AtomicUsize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { dcbs: Mutex::new(Vec::new()), max_segment: AtomicUsize::new(crate::dcb::MAX_SEGMENT) }
    }

    /// Build a registry whose DCBs cap their read-path segment allocation
    /// at `max_segment` instead of the `dcb::MAX_SEGMENT` default.
    pub fn with_max_segment(max_segment: usize) -> Self {
        Self { dcbs: Mutex::new(Vec::new()), max_segment: AtomicUsize::new(max_segment) }
    }

    fn apply_max_segment(&self, dcb: &Dcb) {
        dcb.set_max_segment(self.max_segment.load(Ordering::Relaxed));
    }

    /// Construct a DCB in state `alloc` and append it to the tail of the
    /// global list. No fd is assigned yet.
    pub fn alloc(&self, role: DcbRole, protocol: Arc<dyn Protocol>) -> Arc<Dcb> {
        let dcb = Dcb::new(role, protocol);
        self.apply_max_segment(&dcb);
        self.dcbs.lock().unwrap().push(dcb.clone());
        trace!(role = ?dcb.role(), "dcb allocated");
        dcb
    }

    /// Track a DCB that a protocol module constructed on its own behalf
    /// (the accept path: `Protocol::accept` builds the new DCB directly).
    pub fn track(&self, dcb: Arc<Dcb>) {
        self.apply_max_segment(&dcb);
        self.dcbs.lock().unwrap().push(dcb);
    }

    /// Remove a DCB from the global list. Called exactly once, from the
    /// reclaimer's final-free step, or from a connect/accept failure path
    /// that never made it past `alloc`.
    pub(crate) fn unlink(&self, dcb: &Arc<Dcb>) {
        let mut guard = self.dcbs.lock().unwrap();
        if let Some(pos) = guard.iter().position(|d| Arc::ptr_eq(d, dcb)) {
            guard.remove(pos);
        }
    }

    pub fn len(&self) -> usize {
        self.dcbs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk the global list under the latch, collecting a snapshot of each
    /// DCB, then release the latch before handing the snapshots back —
    /// never hold the list latch across per-DCB work (SPEC_FULL.md §4.8).
    pub fn for_each_snapshot(&self) -> Vec<DcbSnapshot> {
        let guard = self.dcbs.lock().unwrap();
        let snapshots: Vec<DcbSnapshot> = guard.iter().map(|d| d.snapshot()).collect();
        drop(guard);
        snapshots
    }

    /// Orchestrates the outbound connect sequence of SPEC_FULL.md §4.3:
    /// load the named protocol module, allocate, link to the session,
    /// invoke the protocol's `connect` callback, and transition to
    /// `polling` on success (bumping the server's connection counters) or
    /// tear down on failure.
    ///
    /// Step order differs from the spec's literal "allocate, then load the
    /// protocol module" only because a `Dcb` carries its protocol as a
    /// non-optional field: resolving the name first avoids allocating a
    /// DCB that would immediately need to be freed. Nothing is left in the
    /// registry either way if the name does not resolve.
    pub fn connect(
        &self,
        protocol_name: &str,
        protocols: &ProtocolRegistry,
        server: &ServerRef,
        session: Arc<dyn Session>,
        poller: &dyn Poller,
    ) -> DcbResult<Arc<Dcb>> {
        let protocol = protocols
            .resolve(protocol_name)
            .ok_or_else(|| DcbError::ProtocolLoad { name: protocol_name.to_string() })?;

        let dcb = self.alloc(DcbRole::RequestHandler, protocol.clone());

        if session.link_dcb(dcb.fd()) == LinkOutcome::SessionRemoved {
            dcb.mark_disconnected();
            self.unlink(&dcb);
            return Err(DcbError::SessionRemoved);
        }

        match protocol.connect(&dcb, server, &session, poller) {
            Some(fd) => {
                dcb.set_fd(fd);
                dcb.set_session(session);
                let (ok, _) = dcb.set_state(DcbState::Polling);
                if !ok {
                    warn!(fd, "dcb failed to enter polling state after connect");
                }
                server.stats.inc_connections();
                Ok(dcb)
            }
            None => {
                dcb.mark_disconnected();
                self.unlink(&dcb);
                Err(DcbError::Io { fd: -1, source: std::io::Error::last_os_error() })
            }
        }
    }

    /// Wrap an already-bound, already-non-blocking listening fd as a
    /// `listener`-role DCB in state `listening`, registered with `poller`.
    /// Used by binary entry points that own the raw socket setup
    /// themselves (out of scope for the core, see SPEC_FULL.md §1/§6).
    pub fn adopt_listener(&self, fd: i32, protocol: Arc<dyn Protocol>, poller: &dyn Poller) -> DcbResult<Arc<Dcb>> {
        let dcb = self.alloc(DcbRole::Listener, protocol);
        dcb.set_fd(fd);
        poller.add(&dcb)?;
        let (ok, _) = dcb.set_state(DcbState::Listening);
        if !ok {
            warn!(fd, "listener dcb failed to enter listening state");
        }
        Ok(dcb)
    }

    /// Accept one pending connection on `listener` and track the resulting
    /// DCB in the global list.
    pub fn accept(&self, listener: &Dcb, poller: &dyn Poller) -> Option<Arc<Dcb>> {
        let protocol = listener.protocol().clone();
        let new_dcb = protocol.accept(listener, poller, protocol.clone())?;
        self.track(new_dcb.clone());
        Some(new_dcb)
    }
}
