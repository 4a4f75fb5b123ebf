//! The Descriptor Control Block itself: fd, protocol vtable, session
//! back-reference, write queue, stats, and the per-DCB half of the
//! reclamation protocol (the bitmask). Grounded throughout on `DCB` and
//! the `dcb_read`/`dcb_write`/`dcb_drain_writeq`/`dcb_close` family in the
//! original `dcb.c`.
//!
//! The global list and zombie list are deliberately not intrusive links on
//! this struct (the original's `next` / `memdata.next`) — per the
//! redesign note in SPEC_FULL.md §9 they live in [`crate::registry`] and
//! [`crate::zombie`] as external collections keyed by `Arc<Dcb>`.

use std::io;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::bitmask::Bitmask;
use crate::buffer::BufferChain;
use crate::error::{DcbError, DcbResult, Progress};
use crate::poller::Poller;
use crate::protocol::Protocol;
use crate::session::Session;
use crate::state::{DcbState, StateCell};
use crate::stats::StatsSnapshot;

/// Upper bound on a single read-path allocation, so a slow consumer with a
/// large kernel receive buffer cannot force one multi-gigabyte `Vec`.
pub const MAX_SEGMENT: usize = 16 * 1024;

#[cfg(debug_assertions)]
const DCB_CHK_TAG: u32 = 0x44434200; // b"DCB\0" as an integer, same role as the original's CHK_DCB magic.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DcbRole {
    Listener,
    RequestHandler,
    Internal,
}

/// An owned, `Serialize`-able diagnostic summary. See SPEC_FULL.md §4.8.
#[derive(Debug, Clone, Serialize)]
pub struct DcbSnapshot {
    pub fd: i32,
    pub role: DcbRole,
    pub state: DcbState,
    pub remote: Option<String>,
    pub writeq_len: usize,
    pub command: u8,
    pub stats: StatsSnapshot,
}

pub struct Dcb {
    fd: AtomicI32,
    role: DcbRole,
    state: StateCell,
    protocol: Arc<dyn Protocol>,
    session: Mutex<Option<Arc<dyn Session>>>,
    /// Set exactly once, at connect/accept time; read by any thread without
    /// `init_lock` per the invariant justified in SPEC_FULL.md §4.8.
    remote: OnceLock<String>,
    writeq: Mutex<BufferChain>,
    delayq: Mutex<BufferChain>,
    stats: crate::stats::DcbStats,
    /// `memdata.bitmask`. Written once by the close path, then only ever
    /// cleared (never re-set) by reclaimers; see invariant 4 in SPEC_FULL.md §3.
    bitmask: Mutex<Bitmask>,
    command: AtomicU8,
    /// Read-path segment cap, normally `MAX_SEGMENT` but overridable per
    /// registry from `ProxyConfig::max_segment` (§10.3) via
    /// [`Dcb::set_max_segment`].
    max_segment: AtomicUsize,
    #[cfg(debug_assertions)]
    chk: u32,
}

impl Dcb {
    pub(crate) fn new(role: DcbRole, protocol: Arc<dyn Protocol>) -> Arc<Self> {
        Arc::new(Self {
            fd: AtomicI32::new(-1),
            role,
            state: StateCell::new(DcbState::Alloc),
            protocol,
            session: Mutex::new(None),
            remote: OnceLock::new(),
            writeq: Mutex::new(BufferChain::new()),
            delayq: Mutex::new(BufferChain::new()),
            stats: crate::stats::DcbStats::new(),
            bitmask: Mutex::new(Bitmask::new()),
            command: AtomicU8::new(0),
            max_segment: AtomicUsize::new(MAX_SEGMENT),
            #[cfg(debug_assertions)]
            chk: DCB_CHK_TAG,
        })
    }

    #[cfg(debug_assertions)]
    fn check_chk(&self) {
        debug_assert_eq!(self.chk, DCB_CHK_TAG, "dcb fd {} failed CHK_DCB guard", self.fd());
    }

    #[cfg(not(debug_assertions))]
    fn check_chk(&self) {}

    pub fn fd(&self) -> i32 {
        self.fd.load(Ordering::Acquire)
    }

    pub(crate) fn set_fd(&self, fd: i32) {
        self.fd.store(fd, Ordering::Release);
    }

    pub fn role(&self) -> DcbRole {
        self.role
    }

    pub fn state(&self) -> DcbState {
        self.state.get()
    }

    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.get().map(String::as_str)
    }

    /// Succeeds only the first time it is called for a given DCB, mirroring
    /// the "set exactly once" invariant `remote` relies on for lock-free reads.
    pub(crate) fn set_remote(&self, remote: String) {
        let _ = self.remote.set(remote);
    }

    pub fn command(&self) -> u8 {
        self.command.load(Ordering::Relaxed)
    }

    pub fn set_command(&self, command: u8) {
        self.command.store(command, Ordering::Relaxed);
    }

    pub fn max_segment(&self) -> usize {
        self.max_segment.load(Ordering::Relaxed)
    }

    pub(crate) fn set_max_segment(&self, max_segment: usize) {
        self.max_segment.store(max_segment, Ordering::Relaxed);
    }

    pub(crate) fn set_session(&self, session: Arc<dyn Session>) {
        *self.session.lock().unwrap() = Some(session);
    }

    pub(crate) fn take_session(&self) -> Option<Arc<dyn Session>> {
        self.session.lock().unwrap().take()
    }

    pub fn writeq_len(&self) -> usize {
        self.writeq.lock().unwrap().len()
    }

    pub fn stats(&self) -> &crate::stats::DcbStats {
        &self.stats
    }

    pub fn snapshot(&self) -> DcbSnapshot {
        DcbSnapshot {
            fd: self.fd(),
            role: self.role,
            state: self.state(),
            remote: self.remote().map(str::to_owned),
            writeq_len: self.writeq_len(),
            command: self.command(),
            stats: self.stats.snapshot(),
        }
    }

    /// Attempt the `→ polling` transition (accept/listen completion path).
    pub(crate) fn set_state(&self, new_state: DcbState) -> (bool, DcbState) {
        self.state.set_state(new_state, self.fd())
    }

    // ---- Read path (§4.4) --------------------------------------------

    /// Drain whatever is currently available on the fd into `head`, never
    /// blocking. Returns the number of bytes appended, or `WouldBlock` if
    /// the very first readiness check produced nothing.
    pub fn read(&self, head: &mut BufferChain) -> DcbResult<Progress> {
        self.check_chk();
        let fd = self.fd();
        let mut total = 0usize;
        loop {
            let avail = available_bytes(fd)?;
            if avail == 0 {
                break;
            }
            let take = avail.min(self.max_segment());
            let mut buf: Vec<u8> = Vec::new();
            if buf.try_reserve_exact(take).is_err() {
                warn!(fd, total, take, "buffer allocation failed mid-read");
                return if total > 0 {
                    Ok(Progress::Made(total))
                } else {
                    Err(DcbError::ResourceExhausted { bytes_so_far: total })
                };
            }
            buf.resize(take, 0);
            let n = loop {
                let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, take) };
                if n >= 0 {
                    break n as usize;
                }
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => {
                        trace!(fd, total, "read would block, stopping for this dispatch");
                        return Ok(if total > 0 { Progress::Made(total) } else { Progress::WouldBlock });
                    }
                    _ => return Err(DcbError::Io { fd, source: err }),
                }
            };
            if n == 0 {
                debug!(fd, total, "peer closed during read");
                return Ok(Progress::PeerClosed);
            }
            buf.truncate(n);
            head.append_segment(buf);
            total += n;
            self.stats.inc_reads();
        }
        Ok(Progress::Made(total))
    }

    // ---- Write path (§4.5) --------------------------------------------

    /// Append-or-send-opportunistically, under `writeq_lock`.
    ///
    /// The send loop mutates `writeq` directly as each segment is consumed
    /// (rather than building the residual in a detached local and assigning
    /// it back only on the success path), so that a fatal write error still
    /// leaves `writeq` holding exactly whatever was not yet sent — matching
    /// the original's unconditional `dcb->writeq = queue;` after the send
    /// loop, regardless of outcome.
    pub fn write(&self, data: BufferChain) -> DcbResult<()> {
        self.check_chk();
        if data.is_empty() {
            return Ok(());
        }
        let fd = self.fd();
        let mut guard = self.writeq.lock().unwrap();
        if !guard.is_empty() {
            guard.append_chain(data);
            self.stats.inc_buffered();
            trace!(fd, queued = guard.len(), "write deferred: queue already non-empty");
            return Ok(());
        }

        *guard = data;
        let result = loop {
            let Some(seg) = guard.front() else { break Ok(()) };
            match send_once(fd, seg) {
                Ok(SendOutcome::Sent(0)) => break Ok(()),
                Ok(SendOutcome::Sent(n)) => guard.consume(n),
                Ok(SendOutcome::WouldBlock) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stats.inc_writes();
        if !guard.is_empty() {
            trace!(fd, residual = guard.len(), "write left a residual on the queue");
        }
        result
    }

    /// Drain `writeq` on write-readiness. Returns bytes drained.
    pub fn drain_writeq(&self) -> DcbResult<usize> {
        self.check_chk();
        let fd = self.fd();
        let mut guard = self.writeq.lock().unwrap();
        let mut drained = 0usize;
        loop {
            let Some(seg) = guard.front() else { break };
            match send_once(fd, seg)? {
                SendOutcome::Sent(0) => break,
                SendOutcome::Sent(n) => {
                    guard.consume(n);
                    drained += n;
                }
                SendOutcome::WouldBlock => break,
            }
        }
        if drained > 0 {
            trace!(fd, drained, remaining = guard.len(), "drained writeq");
        }
        Ok(drained)
    }

    // ---- Close (§4.6) --------------------------------------------------

    /// The per-DCB half of `close`: attempt `→ nopolling`, and if this is
    /// genuinely the first close, remove the fd from the poller and
    /// snapshot the live-workers bitmask. Returns `true` if the caller
    /// (see [`crate::zombie::close_dcb`]) should enqueue this DCB onto the
    /// zombie list.
    pub(crate) fn begin_close(&self, poller: &dyn Poller) -> bool {
        self.check_chk();
        let fd = self.fd();
        let (_ok, prev) = self.state.set_state(DcbState::Nopolling, fd);
        if prev != DcbState::Nopolling && prev != DcbState::Zombie {
            if let Err(e) = poller.remove(self) {
                warn!(fd, error = %e, "failed to remove dcb from poller during close");
            }
            let live = poller.live_workers();
            *self.bitmask.lock().unwrap() = live;
            debug!(fd, "dcb removed from poller, live-workers bitmask snapshotted");
        }
        matches!(self.state(), DcbState::Nopolling)
    }

    pub(crate) fn is_zombie(&self) -> bool {
        self.state() == DcbState::Zombie
    }

    pub(crate) fn mark_zombie(&self) {
        let (ok, _) = self.state.set_state(DcbState::Zombie, self.fd());
        if !ok {
            warn!(fd = self.fd(), "could not transition dcb to zombie");
        }
    }

    /// Clear `worker_id`'s bit. Returns `true` if the bitmask is now
    /// entirely clear, meaning no live worker can still be mid-dispatch.
    pub(crate) fn clear_worker_bit(&self, worker_id: usize) -> bool {
        let mut bm = self.bitmask.lock().unwrap();
        bm.clear(worker_id);
        bm.is_all_clear()
    }

    pub(crate) fn mark_disconnected(&self) {
        let (ok, _) = self.state.set_state(DcbState::Disconnected, self.fd());
        if !ok {
            warn!(fd = self.fd(), "could not transition dcb to disconnected");
        }
    }

    pub(crate) fn mark_freed(&self) {
        let (ok, _) = self.state.set_state(DcbState::Freed, self.fd());
        if !ok {
            warn!(fd = self.fd(), "could not transition dcb to freed");
        }
    }
}

impl std::fmt::Debug for Dcb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dcb")
            .field("fd", &self.fd())
            .field("role", &self.role)
            .field("state", &self.state())
            .finish()
    }
}

fn available_bytes(fd: i32) -> DcbResult<usize> {
    let mut avail: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut avail as *mut libc::c_int) };
    if rc < 0 {
        return Err(DcbError::AvailableBytesQuery { fd, source: io::Error::last_os_error() });
    }
    Ok(avail.max(0) as usize)
}

enum SendOutcome {
    Sent(usize),
    WouldBlock,
}

/// One non-blocking `write(2)` attempt, restarting on `EINTR`.
///
/// The original source's equivalent check reads
/// `saved_errno != EAGAIN || saved_errno != EWOULDBLOCK`, which is always
/// true and therefore reports every residual-queue case as a hard failure.
/// The corrected predicate below (De Morgan's `&&`) is what is actually
/// implemented: a real error is anything that is neither of the two
/// benign would-block codes.
fn send_once(fd: i32, buf: &[u8]) -> DcbResult<SendOutcome> {
    loop {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(SendOutcome::Sent(n as usize));
        }
        let err = io::Error::last_os_error();
        let code = err.raw_os_error().unwrap_or(0);
        if code == libc::EINTR {
            continue;
        }
        if code != libc::EAGAIN && code != libc::EWOULDBLOCK {
            return Err(DcbError::Io { fd, source: err });
        }
        return Ok(SendOutcome::WouldBlock);
    }
}
