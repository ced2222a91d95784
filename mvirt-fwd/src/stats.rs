//! Per-port traffic counters shared between workers and the reporter.
//!
//! Every counter is an independent `AtomicU64` bumped with `fetch_add`. No
//! update spans more than one counter, so no lock is needed.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::dataplane::PortId;

/// Live counters for one port.
#[derive(Debug, Default)]
pub struct PortStats {
    rx_packets: AtomicU64,
    tx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    dropped: AtomicU64,
}

impl PortStats {
    pub fn snapshot(&self) -> PortSnapshot {
        PortSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a port's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortSnapshot {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub dropped: u64,
}

impl PortSnapshot {
    /// Counter increase since `earlier`.
    pub fn since(&self, earlier: &PortSnapshot) -> PortSnapshot {
        PortSnapshot {
            rx_packets: self.rx_packets.saturating_sub(earlier.rx_packets),
            tx_packets: self.tx_packets.saturating_sub(earlier.tx_packets),
            rx_bytes: self.rx_bytes.saturating_sub(earlier.rx_bytes),
            tx_bytes: self.tx_bytes.saturating_sub(earlier.tx_bytes),
            dropped: self.dropped.saturating_sub(earlier.dropped),
        }
    }
}

/// Counters for all ports.
#[derive(Debug)]
pub struct StatsRegistry {
    ports: Box<[PortStats]>,
}

impl StatsRegistry {
    pub fn new(port_count: usize) -> Self {
        Self {
            ports: (0..port_count).map(|_| PortStats::default()).collect(),
        }
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    #[inline]
    fn port(&self, port: PortId) -> Option<&PortStats> {
        let stats = self.ports.get(port.index());
        debug_assert!(stats.is_some(), "no counters for port {port}");
        stats
    }

    #[inline]
    pub fn record_rx(&self, port: PortId, packets: u64, bytes: u64) {
        if let Some(s) = self.port(port) {
            s.rx_packets.fetch_add(packets, Ordering::Relaxed);
            s.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_tx(&self, port: PortId, packets: u64, bytes: u64) {
        if let Some(s) = self.port(port) {
            s.tx_packets.fetch_add(packets, Ordering::Relaxed);
            s.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_drop(&self, port: PortId, count: u64) {
        if let Some(s) = self.port(port) {
            s.dropped.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Current counters of one port. Unknown ports read as zero.
    pub fn snapshot(&self, port: PortId) -> PortSnapshot {
        self.ports
            .get(port.index())
            .map(PortStats::snapshot)
            .unwrap_or_default()
    }

    /// Current counters of every port, indexed by port id.
    pub fn snapshot_all(&self) -> Vec<PortSnapshot> {
        self.ports.iter().map(PortStats::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_and_snapshot() {
        let stats = StatsRegistry::new(2);
        stats.record_rx(PortId(1), 3, 300);
        stats.record_tx(PortId(0), 2, 200);
        stats.record_drop(PortId(1), 1);

        assert_eq!(
            stats.snapshot(PortId(1)),
            PortSnapshot {
                rx_packets: 3,
                rx_bytes: 300,
                dropped: 1,
                ..Default::default()
            }
        );
        assert_eq!(
            stats.snapshot(PortId(0)),
            PortSnapshot {
                tx_packets: 2,
                tx_bytes: 200,
                ..Default::default()
            }
        );
        assert_eq!(stats.snapshot_all().len(), 2);
    }

    #[test]
    fn test_unknown_port_reads_zero() {
        let stats = StatsRegistry::new(2);
        assert_eq!(stats.snapshot(PortId(7)), PortSnapshot::default());
    }

    #[test]
    fn test_since() {
        let earlier = PortSnapshot {
            rx_packets: 10,
            tx_packets: 5,
            rx_bytes: 1000,
            tx_bytes: 500,
            dropped: 1,
        };
        let later = PortSnapshot {
            rx_packets: 15,
            tx_packets: 9,
            rx_bytes: 1600,
            tx_bytes: 900,
            dropped: 1,
        };
        assert_eq!(
            later.since(&earlier),
            PortSnapshot {
                rx_packets: 5,
                tx_packets: 4,
                rx_bytes: 600,
                tx_bytes: 400,
                dropped: 0,
            }
        );
    }

    #[test]
    fn test_concurrent_updates_not_lost() {
        const THREADS: u64 = 8;
        const ITERATIONS: u64 = 10_000;

        let stats = Arc::new(StatsRegistry::new(2));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        stats.record_rx(PortId(1), 1, 64);
                        stats.record_tx(PortId(0), 1, 64);
                        stats.record_drop(PortId(1), 1);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let total = THREADS * ITERATIONS;
        let rx = stats.snapshot(PortId(1));
        let tx = stats.snapshot(PortId(0));
        assert_eq!(rx.rx_packets, total);
        assert_eq!(rx.rx_bytes, total * 64);
        assert_eq!(rx.dropped, total);
        assert_eq!(tx.tx_packets, total);
        assert_eq!(tx.tx_bytes, total * 64);
    }
}
