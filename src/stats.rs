//! Per-DCB statistics, grounded on the original `DCBSTATS` struct
//! (`n_reads`, `n_writes`, `n_buffered`, `n_accepts`).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DcbStats {
    n_reads: AtomicU64,
    n_writes: AtomicU64,
    n_buffered: AtomicU64,
    n_accepts: AtomicU64,
}

impl DcbStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_reads(&self) {
        self.n_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_writes(&self) {
        self.n_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_buffered(&self) {
        self.n_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_accepts(&self) {
        self.n_accepts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn n_reads(&self) -> u64 {
        self.n_reads.load(Ordering::Relaxed)
    }

    pub fn n_writes(&self) -> u64 {
        self.n_writes.load(Ordering::Relaxed)
    }

    pub fn n_buffered(&self) -> u64 {
        self.n_buffered.load(Ordering::Relaxed)
    }

    pub fn n_accepts(&self) -> u64 {
        self.n_accepts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            n_reads: self.n_reads(),
            n_writes: self.n_writes(),
            n_buffered: self.n_buffered(),
            n_accepts: self.n_accepts(),
        }
    }
}

/// An owned, serializable point-in-time copy of [`DcbStats`], used by
/// diagnostics (see [`crate::dcb::Dcb::snapshot`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub n_reads: u64,
    pub n_writes: u64,
    pub n_buffered: u64,
    pub n_accepts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let stats = DcbStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot { n_reads: 0, n_writes: 0, n_buffered: 0, n_accepts: 0 });
    }

    #[test]
    fn increments_are_independent() {
        let stats = DcbStats::new();
        stats.inc_reads();
        stats.inc_writes();
        stats.inc_writes();
        stats.inc_buffered();
        assert_eq!(stats.n_reads(), 1);
        assert_eq!(stats.n_writes(), 2);
        assert_eq!(stats.n_buffered(), 1);
        assert_eq!(stats.n_accepts(), 0);
    }
}
