//! Poller collaborator interface.
//!
//! The poller itself is out of scope (§1): it is a registry keyed by fd
//! with three operations the DCB core needs — `add`, `remove`, and a
//! snapshot of which worker ids might currently be mid-dispatch. A
//! reference `mio`-backed implementation lives in [`mio_poller`] purely so
//! the crate is independently buildable and testable end-to-end (§10.5);
//! the core itself only ever talks to the trait below.

use crate::bitmask::Bitmask;
use crate::dcb::Dcb;
use crate::error::DcbResult;

pub trait Poller: Send + Sync {
    /// Register `dcb`'s fd for readiness notification.
    fn add(&self, dcb: &Dcb) -> DcbResult<()>;

    /// Deregister `dcb`'s fd. Called exactly once, from the close path,
    /// before the live-workers bitmask is snapshotted.
    fn remove(&self, dcb: &Dcb) -> DcbResult<()>;

    /// The set of worker ids that may currently be executing a dispatch
    /// and could therefore still be holding a reference to any DCB.
    fn live_workers(&self) -> Bitmask;
}

pub mod mio_poller;
