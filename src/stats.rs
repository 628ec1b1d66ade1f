//! Native I/O counters
//!
//! Every native call a driver makes from a task-queue step is counted here.
//! Counters are atomics updated with `Ordering::Relaxed`: they are only ever
//! read for reporting, so no ordering with other memory is needed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-isolate native I/O counters
///
/// # Usage
///
/// ```rust,ignore
/// iso.stats().record_open();
/// iso.stats().record_read(512);
/// assert_eq!(iso.stats().snapshot().opens, 1);
/// ```
#[derive(Debug, Default)]
pub struct IoStats {
    /// Native stat calls
    stats: AtomicU64,
    /// Native open calls
    opens: AtomicU64,
    /// Native read calls
    reads: AtomicU64,
    /// Bytes returned by native reads
    bytes_read: AtomicU64,
    /// Native write calls
    writes: AtomicU64,
    /// Bytes accepted by native writes
    bytes_written: AtomicU64,
    /// Native close calls
    closes: AtomicU64,
    /// Native directory scans
    scans: AtomicU64,
    /// Native failures absorbed into zero-effect replies
    errors: AtomicU64,
}

/// Point-in-time copy of [`IoStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    /// Native stat calls
    pub stats: u64,
    /// Native open calls
    pub opens: u64,
    /// Native read calls
    pub reads: u64,
    /// Bytes returned by native reads
    pub bytes_read: u64,
    /// Native write calls
    pub writes: u64,
    /// Bytes accepted by native writes
    pub bytes_written: u64,
    /// Native close calls
    pub closes: u64,
    /// Native directory scans
    pub scans: u64,
    /// Absorbed native failures
    pub errors: u64,
}

impl IoStats {
    /// Create zeroed counters
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stats: AtomicU64::new(0),
            opens: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            scans: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Count a native stat
    pub fn record_stat(&self) {
        self.stats.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a native open
    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a native read returning `bytes`
    pub fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count a native write accepting `bytes`
    pub fn record_write(&self, bytes: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count a native close
    pub fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a native directory scan
    pub fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a native failure
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of native opens so far
    #[must_use]
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Number of absorbed native failures so far
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Read every counter
    #[must_use]
    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            stats: self.stats.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = IoStats::new();
        stats.record_open();
        stats.record_read(10);
        stats.record_read(0);
        stats.record_write(4);
        stats.record_error();

        let snap = stats.snapshot();
        assert_eq!(snap.opens, 1);
        assert_eq!(snap.reads, 2);
        assert_eq!(snap.bytes_read, 10);
        assert_eq!(snap.writes, 1);
        assert_eq!(snap.bytes_written, 4);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.closes, 0);
    }
}
