//! Descriptor Control Block subsystem for a non-blocking MySQL/MariaDB
//! protocol proxy router.
//!
//! A DCB binds a file descriptor to protocol callbacks, buffers outbound
//! bytes for edge-triggered draining, carries a formal lifecycle state
//! machine, and is reclaimed only once every polling worker that might
//! still be mid-dispatch on it has quiesced. The [`dcb`], [`registry`],
//! and [`zombie`] modules are the core; [`poller::mio_poller`] and
//! [`protocol::echo`] are a reference implementation of the external
//! collaborator traits, provided so the crate is independently buildable
//! and testable, not part of the core's contract.

pub mod bitmask;
pub mod buffer;
pub mod config;
pub mod dcb;
pub mod error;
pub mod logging;
pub mod poller;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod state;
pub mod stats;
pub mod zombie;

pub use dcb::{Dcb, DcbRole, DcbSnapshot};
pub use error::{DcbError, DcbResult, Progress};
pub use registry::Registry;
pub use state::DcbState;
pub use zombie::ZombieList;
