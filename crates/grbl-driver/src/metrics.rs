//! Link traffic metrics
//!
//! Lock-free counters updated by the IO threads; read them with
//! [`LinkMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// Blocks written (`\n` terminated)
    pub tx_lines: AtomicU64,
    /// Bytes written, blocks and realtime bytes
    pub tx_bytes: AtomicU64,
    /// Realtime bytes written
    pub tx_realtime: AtomicU64,
    /// Write failures
    pub tx_errors: AtomicU64,

    /// Lines read
    pub rx_lines: AtomicU64,
    pub rx_acks: AtomicU64,
    pub rx_errors: AtomicU64,
    pub rx_status: AtomicU64,
    pub rx_other: AtomicU64,
    /// Status reports that could not be decoded, and undecodable lines
    pub rx_malformed: AtomicU64,
    /// Read polls that returned without data
    pub rx_timeouts: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            tx_lines: load(&self.tx_lines),
            tx_bytes: load(&self.tx_bytes),
            tx_realtime: load(&self.tx_realtime),
            tx_errors: load(&self.tx_errors),
            rx_lines: load(&self.rx_lines),
            rx_acks: load(&self.rx_acks),
            rx_errors: load(&self.rx_errors),
            rx_status: load(&self.rx_status),
            rx_other: load(&self.rx_other),
            rx_malformed: load(&self.rx_malformed),
            rx_timeouts: load(&self.rx_timeouts),
        }
    }
}

/// Point-in-time copy of [`LinkMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tx_lines: u64,
    pub tx_bytes: u64,
    pub tx_realtime: u64,
    pub tx_errors: u64,
    pub rx_lines: u64,
    pub rx_acks: u64,
    pub rx_errors: u64,
    pub rx_status: u64,
    pub rx_other: u64,
    pub rx_malformed: u64,
    pub rx_timeouts: u64,
}

impl MetricsSnapshot {
    /// Blocks written but not yet answered
    pub fn unanswered(&self) -> u64 {
        self.tx_lines.saturating_sub(self.rx_acks + self.rx_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = LinkMetrics::new();
        LinkMetrics::incr(&metrics.tx_lines);
        LinkMetrics::incr(&metrics.tx_lines);
        LinkMetrics::incr(&metrics.rx_acks);
        metrics.tx_bytes.fetch_add(12, Ordering::Relaxed);

        let snap = metrics.snapshot();
        assert_eq!(snap.tx_lines, 2);
        assert_eq!(snap.tx_bytes, 12);
        assert_eq!(snap.unanswered(), 1);
        assert_eq!(snap.rx_malformed, 0);
    }
}
