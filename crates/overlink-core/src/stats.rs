//! Passive statistics for message reassembly.
//!
//! The linearizer reports what it sees to a [`StatsSink`]; nothing it does
//! depends on the sink. [`LinearizerStats`] is the stock lock-free sink and
//! can be shared across many linearizers behind an `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Observer of reassembly events
///
/// All methods default to no-ops so implementors only override what they
/// track.
pub trait StatsSink: Send + Sync {
    /// A non-empty chunk was handed to `push`
    fn chunk_received(&self, _len: u64) {}

    /// Bytes of a chunk were already delivered or buffered and were dropped
    fn duplicate_dropped(&self, _len: u64) {}

    /// Bytes were handed to the consumer
    fn bytes_delivered(&self, _len: u64) {}

    /// A consumer read was resolved with data
    fn read_satisfied(&self) {}

    /// The stream reached its terminal state
    fn stream_closed(&self, _status: &Result<()>) {}
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsSink for NoopStats {}

/// Atomic counter sink
#[derive(Debug, Default)]
pub struct LinearizerStats {
    chunks_received: AtomicU64,
    bytes_received: AtomicU64,
    duplicate_bytes: AtomicU64,
    bytes_delivered: AtomicU64,
    reads_satisfied: AtomicU64,
    closed_ok: AtomicU64,
    closed_failed: AtomicU64,
}

impl LinearizerStats {
    /// Create a zeroed counter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a consistent-enough snapshot of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            duplicate_bytes: self.duplicate_bytes.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            reads_satisfied: self.reads_satisfied.load(Ordering::Relaxed),
            closed_ok: self.closed_ok.load(Ordering::Relaxed),
            closed_failed: self.closed_failed.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters
    pub fn reset(&self) {
        self.chunks_received.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.duplicate_bytes.store(0, Ordering::Relaxed);
        self.bytes_delivered.store(0, Ordering::Relaxed);
        self.reads_satisfied.store(0, Ordering::Relaxed);
        self.closed_ok.store(0, Ordering::Relaxed);
        self.closed_failed.store(0, Ordering::Relaxed);
    }
}

impl StatsSink for LinearizerStats {
    fn chunk_received(&self, len: u64) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len, Ordering::Relaxed);
    }

    fn duplicate_dropped(&self, len: u64) {
        self.duplicate_bytes.fetch_add(len, Ordering::Relaxed);
    }

    fn bytes_delivered(&self, len: u64) {
        self.bytes_delivered.fetch_add(len, Ordering::Relaxed);
    }

    fn read_satisfied(&self) {
        self.reads_satisfied.fetch_add(1, Ordering::Relaxed);
    }

    fn stream_closed(&self, status: &Result<()>) {
        if status.is_ok() {
            self.closed_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.closed_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`LinearizerStats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Non-empty chunks pushed
    pub chunks_received: u64,
    /// Payload bytes pushed, duplicates included
    pub bytes_received: u64,
    /// Bytes dropped as stale or already buffered
    pub duplicate_bytes: u64,
    /// Bytes handed to consumers
    pub bytes_delivered: u64,
    /// Reads resolved with data
    pub reads_satisfied: u64,
    /// Streams closed successfully
    pub closed_ok: u64,
    /// Streams closed with a failure
    pub closed_failed: u64,
}

impl StatsSnapshot {
    /// Fraction of received bytes that were redundant, in percent
    pub fn duplicate_rate(&self) -> f64 {
        if self.bytes_received == 0 {
            0.0
        } else {
            self.duplicate_bytes as f64 / self.bytes_received as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinearizeError;

    #[test]
    fn test_counters() {
        let stats = LinearizerStats::new();
        stats.chunk_received(10);
        stats.chunk_received(6);
        stats.duplicate_dropped(4);
        stats.bytes_delivered(12);
        stats.read_satisfied();
        stats.stream_closed(&Ok(()));
        stats.stream_closed(&Err(LinearizeError::Cancelled("gap".into())));

        let snap = stats.snapshot();
        assert_eq!(snap.chunks_received, 2);
        assert_eq!(snap.bytes_received, 16);
        assert_eq!(snap.duplicate_bytes, 4);
        assert_eq!(snap.bytes_delivered, 12);
        assert_eq!(snap.reads_satisfied, 1);
        assert_eq!(snap.closed_ok, 1);
        assert_eq!(snap.closed_failed, 1);
        assert!((snap.duplicate_rate() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let stats = LinearizerStats::new();
        stats.chunk_received(3);
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
        assert_eq!(stats.snapshot().duplicate_rate(), 0.0);
    }
}
