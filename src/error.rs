//! Error taxonomy for the DCB subsystem.
//!
//! Transient conditions (`EAGAIN`/`EWOULDBLOCK`/interrupted) are never
//! represented here — per the read/write path's policy they fold into the
//! ordinary `Ok` return paths as a [`Progress`] value. `DcbError` carries
//! only what the core treats as a real failure: fatal I/O, an illegal
//! state transition, resource exhaustion, or a protocol module that failed
//! to load.

use thiserror::Error;

/// Outcome of a non-blocking I/O attempt that may legitimately make no
/// progress without that being an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// `n` bytes were transferred.
    Made(usize),
    /// The fd would block; no bytes were transferred this call.
    WouldBlock,
    /// The peer closed its end (read returned 0).
    PeerClosed,
}

#[derive(Debug, Error)]
pub enum DcbError {
    #[error("fatal I/O error on fd {fd}: {source}")]
    Io {
        fd: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("FIONREAD failed on fd {fd}: {source}")]
    AvailableBytesQuery {
        fd: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("illegal state transition for dcb fd {fd}: {from:?} -> {to:?}")]
    IllegalTransition {
        fd: i32,
        from: crate::state::DcbState,
        to: crate::state::DcbState,
    },

    #[error("failed to load protocol module '{name}'")]
    ProtocolLoad { name: String },

    #[error("session has already been removed, cannot link dcb")]
    SessionRemoved,

    #[error("buffer allocation failed after {bytes_so_far} bytes")]
    ResourceExhausted { bytes_so_far: usize },
}

pub type DcbResult<T> = Result<T, DcbError>;
