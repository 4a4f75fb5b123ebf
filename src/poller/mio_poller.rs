//! Reference [`Poller`] implementation backed by `mio`. Grounded on the
//! multi-worker `mio::Poll`/`Events`/`Token` event loop in
//! `pelikan-io-grow-a-cache`'s `mio_impl::event_loop`: one dedicated
//! `mio::Poll` registry, raw fds registered via `SourceFd`, and a fixed
//! worker-thread count decided at startup.
//!
//! Not part of the DCB core's specification (SPEC_FULL.md §10.5) — a
//! consumer is free to swap in any other `Poller` implementation without
//! touching [`crate::dcb`], [`crate::registry`], or [`crate::zombie`].

use std::os::fd::RawFd;
use std::sync::Mutex;

use mio::unix::SourceFd;
use mio::{Interest, Poll, Token};
use tracing::{trace, warn};

use crate::bitmask::Bitmask;
use crate::dcb::Dcb;
use crate::error::{DcbError, DcbResult};
use crate::poller::Poller;

/// Wraps a single `mio::Registry` and a fixed set of worker ids that are
/// considered "live" for the lifetime of the poller — in this reference
/// implementation workers are started together at startup and run until
/// shutdown, so the live set never needs dynamic membership tracking.
pub struct MioPoller {
    registry: Mutex<mio::Registry>,
    live: Bitmask,
}

impl MioPoller {
    pub fn new(poll: &Poll, num_workers: usize) -> std::io::Result<Self> {
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            registry: Mutex::new(registry),
            live: Bitmask::from_ids(0..num_workers),
        })
    }

    fn token_for(fd: RawFd) -> Token {
        Token(fd as usize)
    }
}

impl Poller for MioPoller {
    fn add(&self, dcb: &Dcb) -> DcbResult<()> {
        let fd = dcb.fd();
        let registry = self.registry.lock().unwrap();
        registry
            .register(&mut SourceFd(&fd), Self::token_for(fd), Interest::READABLE | Interest::WRITABLE)
            .map_err(|source| DcbError::Io { fd, source })?;
        trace!(fd, "dcb registered with mio poller");
        Ok(())
    }

    fn remove(&self, dcb: &Dcb) -> DcbResult<()> {
        let fd = dcb.fd();
        if fd < 0 {
            return Ok(());
        }
        let registry = self.registry.lock().unwrap();
        if let Err(source) = registry.deregister(&mut SourceFd(&fd)) {
            warn!(fd, error = %source, "failed to deregister dcb from mio poller");
            return Err(DcbError::Io { fd, source });
        }
        Ok(())
    }

    fn live_workers(&self) -> Bitmask {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_workers_matches_startup_count() {
        let poll = Poll::new().unwrap();
        let poller = MioPoller::new(&poll, 4).unwrap();
        let live = poller.live_workers();
        assert!(live.is_set(0));
        assert!(live.is_set(3));
        assert!(!live.is_set(4));
    }
}
