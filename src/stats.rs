//! Pipeline counters shared by the listener and workers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free ingestion counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    read_errors: AtomicU64,
    format_errors: AtomicU64,
    inserted: AtomicU64,
    duplicates: AtomicU64,
    store_failures: AtomicU64,
    dropped_on_shutdown: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub read_errors: u64,
    pub format_errors: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub store_failures: u64,
    pub dropped_on_shutdown: u64,
}

impl PipelineStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_format_error(&self) {
        self.format_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inserted(&self) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_on_shutdown.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            format_errors: self.format_errors.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            dropped_on_shutdown: self.dropped_on_shutdown.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Datagrams that reached a terminal outcome in a worker.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.format_errors + self.inserted + self.duplicates + self.store_failures
    }

    /// Share of processed datagrams that were duplicates (0.0 to 1.0).
    #[must_use]
    pub fn dupe_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            0.0
        } else {
            self.duplicates as f64 / processed as f64
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} inserted={} duplicates={} format_errors={} store_failures={} read_errors={} dropped={}",
            self.received,
            self.inserted,
            self.duplicates,
            self.format_errors,
            self.store_failures,
            self.read_errors,
            self.dropped_on_shutdown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = PipelineStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_inserted();
        stats.record_duplicate();

        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.processed(), 2);
        assert!((snap.dupe_rate() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_empty_dupe_rate() {
        assert!(StatsSnapshot::default().dupe_rate().abs() < f64::EPSILON);
    }
}
