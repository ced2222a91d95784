//! Periodic traffic report.
//!
//! The reporter only reads the registry. Its previous sample lives on its own
//! thread, so it needs no synchronization.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, warn};

use crate::cpu;
use crate::dataplane::PortId;
use crate::stats::{PortSnapshot, StatsRegistry};

/// One port's line in a report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortReport {
    pub port: PortId,
    /// Counters at sample time
    pub totals: PortSnapshot,
    /// Increase since the previous sample
    pub delta: PortSnapshot,
    pub rx_bps: f64,
    pub tx_bps: f64,
}

impl PortReport {
    pub fn rx_mbps(&self) -> f64 {
        self.rx_bps / 1e6
    }

    pub fn tx_mbps(&self) -> f64 {
        self.tx_bps / 1e6
    }
}

impl fmt::Display for PortReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Port {} | RX: {:>10} pkts {:>14} B | TX: {:>10} pkts {:>14} B | Drop: {:>8} | RX: {:>9.2} Mbps | TX: {:>9.2} Mbps",
            self.port,
            self.totals.rx_packets,
            self.totals.rx_bytes,
            self.totals.tx_packets,
            self.totals.tx_bytes,
            self.totals.dropped,
            self.rx_mbps(),
            self.tx_mbps(),
        )
    }
}

fn bits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / secs
}

/// Samples the registry and turns counter deltas into rates.
pub struct StatsReporter {
    stats: Arc<StatsRegistry>,
    interval: Duration,
    previous: Vec<PortSnapshot>,
    last_sample: Instant,
}

impl StatsReporter {
    /// Rates in the first report cover everything since creation.
    pub fn new(stats: Arc<StatsRegistry>, interval: Duration) -> Self {
        Self::starting_at(stats, interval, Instant::now())
    }

    pub fn starting_at(stats: Arc<StatsRegistry>, interval: Duration, start: Instant) -> Self {
        let previous = vec![PortSnapshot::default(); stats.port_count()];
        Self {
            stats,
            interval,
            previous,
            last_sample: start,
        }
    }

    /// Read all counters, compute deltas against the previous sample and
    /// remember this one.
    pub fn sample_at(&mut self, now: Instant) -> Vec<PortReport> {
        let elapsed = now.saturating_duration_since(self.last_sample);
        let current = self.stats.snapshot_all();

        let reports = current
            .iter()
            .zip(&self.previous)
            .enumerate()
            .map(|(i, (cur, prev))| {
                let delta = cur.since(prev);
                PortReport {
                    port: PortId(i as u16),
                    totals: *cur,
                    delta,
                    rx_bps: bits_per_second(delta.rx_bytes, elapsed),
                    tx_bps: bits_per_second(delta.tx_bytes, elapsed),
                }
            })
            .collect();

        self.previous = current;
        self.last_sample = now;
        reports
    }

    pub fn sample(&mut self) -> Vec<PortReport> {
        self.sample_at(Instant::now())
    }

    /// Format a full report block.
    pub fn render(&self, reports: &[PortReport]) -> String {
        let mut out = format!(
            "=== Traffic Stats (Interval: {}s) ===\n",
            self.interval.as_secs_f64()
        );
        for report in reports {
            out.push_str(&report.to_string());
            out.push('\n');
        }
        out.push_str("=====================================\n");
        out
    }

    /// Print a report every interval until `shutdown` fires or disconnects.
    pub fn run(mut self, shutdown: Receiver<()>) {
        let mut deadline = Instant::now() + self.interval;
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match shutdown.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            let reports = self.sample();
            println!("{}", self.render(&reports));

            // Fixed cadence: skip ticks that were missed rather than bunching up.
            deadline += self.interval;
            let now = Instant::now();
            if deadline < now {
                deadline = now + self.interval;
            }
        }
        debug!("Stats reporter stopped");
    }
}

/// Start the reporter on its own thread, pinned to `cpu` if given.
pub fn spawn_reporter(
    reporter: StatsReporter,
    shutdown: Receiver<()>,
    cpu: Option<usize>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("fwd-stats".to_string())
        .spawn(move || {
            if let Some(cpu) = cpu
                && let Err(e) = cpu::pin_current_thread(cpu)
            {
                warn!(cpu, error = %e, "Could not pin stats reporter");
            }
            reporter.run(shutdown);
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_from_deltas() {
        let stats = Arc::new(StatsRegistry::new(2));
        let start = Instant::now();
        let mut reporter = StatsReporter::starting_at(stats.clone(), Duration::from_secs(1), start);

        // 1_250_000 bytes in 1 s = 10 Mbps
        stats.record_rx(PortId(1), 1000, 1_250_000);
        stats.record_tx(PortId(0), 1000, 1_250_000);

        let reports = reporter.sample_at(start + Duration::from_secs(1));
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].delta.rx_packets, 1000);
        assert!((reports[1].rx_mbps() - 10.0).abs() < 1e-9);
        assert!((reports[0].tx_mbps() - 10.0).abs() < 1e-9);
        assert_eq!(reports[0].rx_bps, 0.0);
    }

    #[test]
    fn test_previous_sample_replaced() {
        let stats = Arc::new(StatsRegistry::new(1));
        let start = Instant::now();
        let mut reporter = StatsReporter::starting_at(stats.clone(), Duration::from_secs(2), start);

        stats.record_rx(PortId(0), 10, 1000);
        reporter.sample_at(start + Duration::from_secs(2));

        stats.record_rx(PortId(0), 5, 500);
        let reports = reporter.sample_at(start + Duration::from_secs(4));

        assert_eq!(reports[0].totals.rx_packets, 15);
        assert_eq!(reports[0].delta.rx_packets, 5);
        assert_eq!(reports[0].delta.rx_bytes, 500);
        // 500 bytes over 2 s
        assert!((reports[0].rx_bps - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_interval() {
        let stats = Arc::new(StatsRegistry::new(2));
        let start = Instant::now();
        let mut reporter = StatsReporter::starting_at(stats, Duration::from_secs(1), start);

        let reports = reporter.sample_at(start + Duration::from_secs(1));
        assert!(reports.iter().all(|r| r.delta == PortSnapshot::default()));
        assert!(reports.iter().all(|r| r.rx_bps == 0.0 && r.tx_bps == 0.0));
    }

    #[test]
    fn test_zero_elapsed() {
        let stats = Arc::new(StatsRegistry::new(1));
        let start = Instant::now();
        let mut reporter = StatsReporter::starting_at(stats.clone(), Duration::from_secs(1), start);
        stats.record_rx(PortId(0), 1, 100);

        let reports = reporter.sample_at(start);
        assert_eq!(reports[0].rx_bps, 0.0);
    }

    #[test]
    fn test_render() {
        let stats = Arc::new(StatsRegistry::new(2));
        let start = Instant::now();
        let mut reporter = StatsReporter::starting_at(stats.clone(), Duration::from_secs(1), start);
        stats.record_drop(PortId(1), 3);

        let reports = reporter.sample_at(start + Duration::from_secs(1));
        let text = reporter.render(&reports);

        assert!(text.starts_with("=== Traffic Stats (Interval: 1s) ==="));
        assert!(text.contains("Port 0 |"));
        assert!(text.contains("Port 1 |"));
        assert!(text.contains(&format!("Drop: {:>8}", 3)));
    }

    #[test]
    fn test_run_stops_on_disconnect() {
        let stats = Arc::new(StatsRegistry::new(2));
        let reporter = StatsReporter::new(stats, Duration::from_secs(60));
        let (tx, rx) = crossbeam_channel::bounded(0);

        let handle = spawn_reporter(reporter, rx, None).unwrap();
        drop(tx);
        handle.join().unwrap();
    }
}
