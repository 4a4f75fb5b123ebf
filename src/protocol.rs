//! Protocol vtable consumed by the DCB.
//!
//! A capability interface standing in for the original's function-pointer
//! struct (`GWPROTOCOL`): `{connect, accept, read, write, close, hangup,
//! error}`, borrowed from a named protocol module and treated as immutable
//! for the DCB's lifetime (SPEC_FULL.md §9, "Protocol vtable via function
//! pointers"). Parsing any particular wire protocol is explicitly out of
//! scope (§1); `echo` (§10.5) is a toy implementation used only for demos
//! and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dcb::Dcb;
use crate::error::DcbResult;
use crate::poller::Poller;
use crate::session::Session;

/// Per-server connection counters, mirroring the original's
/// `server->stats.n_connections`/`n_current` fields bumped by
/// `dcb_connect` on a successful outbound connect.
#[derive(Debug, Default)]
pub struct ServerStats {
    n_connections: AtomicU64,
    n_current: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more successful connection to this server.
    pub(crate) fn inc_connections(&self) {
        self.n_connections.fetch_add(1, Ordering::Relaxed);
        self.n_current.fetch_add(1, Ordering::Relaxed);
    }

    pub fn n_connections(&self) -> u64 {
        self.n_connections.load(Ordering::Relaxed)
    }

    pub fn n_current(&self) -> u64 {
        self.n_current.load(Ordering::Relaxed)
    }
}

/// A server to connect to, as far as the protocol module is concerned —
/// the DCB core never interprets `host`/`port` beyond passing them
/// through to the protocol module's `connect` callback.
#[derive(Debug, Default)]
pub struct ServerRef {
    pub host: String,
    pub port: u16,
    pub stats: ServerStats,
}

impl ServerRef {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, stats: ServerStats::new() }
    }
}

/// Name -> protocol module resolution, standing in for the original's
/// `load_module(name, "Protocol")` dynamic loader. Protocol modules are
/// registered ahead of time (at startup); looking up an unregistered name
/// is the `DcbError::ProtocolLoad` failure path in `Registry::connect`.
#[derive(Default)]
pub struct ProtocolRegistry {
    modules: HashMap<String, Arc<dyn Protocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self { modules: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, protocol: Arc<dyn Protocol>) {
        self.modules.insert(name.into(), protocol);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Protocol>> {
        self.modules.get(name).cloned()
    }
}

pub trait Protocol: Send + Sync {
    /// Create the socket, initiate a non-blocking connect, and register
    /// the fd with the poller. Returns the fd, or `None` on failure.
    fn connect(&self, dcb: &Dcb, server: &ServerRef, session: &Arc<dyn Session>, poller: &dyn Poller) -> Option<i32>;

    /// Accept one pending connection on a listener DCB and produce a new
    /// DCB for it, already registered with the poller. `self_handle` is an
    /// `Arc` to this same protocol instance, threaded through so the new
    /// DCB can share it (accepted connections speak the same protocol as
    /// their listener).
    fn accept(&self, listener: &Dcb, poller: &dyn Poller, self_handle: Arc<dyn Protocol>) -> Option<Arc<Dcb>>;

    /// Invoked on read-readiness; implementations call back into
    /// [`Dcb::read`] and interpret the resulting buffer chain.
    fn read(&self, dcb: &Dcb) -> DcbResult<()>;

    /// Invoked to send `data`; implementations call into [`Dcb::write`].
    fn write(&self, dcb: &Dcb, data: crate::buffer::BufferChain) -> DcbResult<()>;

    fn close(&self, dcb: &Dcb);
    fn hangup(&self, dcb: &Dcb);
    fn error(&self, dcb: &Dcb);
}

pub mod echo;
