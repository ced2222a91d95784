//! Per-queue forwarding worker
//!
//! Each worker owns one (port, queue) assignment and busy-polls it:
//! - Drain a burst from the partner port's queue
//! - Drop non-IPv4, truncated and blocked-source frames
//! - Rewrite the destination MAC of the rest
//! - Transmit them on its own port and account for what did not fit

use std::ops::AddAssign;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use smoltcp::wire::EthernetAddress;
use tracing::{info, trace, warn};

use crate::assign::QueueAssignment;
use crate::cpu;
use crate::filter::BlockList;
use crate::stats::StatsRegistry;

use super::buffer::PacketBuf;
use super::packet::{FrameKind, classify, rewrite_dst_mac};
use super::queue::PortQueues;

/// Upper bound on frames handled per iteration.
pub const MAX_BURST: usize = 32;

/// Outcome of one or more polling iterations.
///
/// `received == forwarded + filtered + non_ip + malformed + unsent`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurstSummary {
    pub received: u64,
    pub forwarded: u64,
    /// Blocked source address
    pub filtered: u64,
    /// Not IPv4, released without counting as a drop
    pub non_ip: u64,
    /// Shorter than the headers it needs
    pub malformed: u64,
    /// Passed filtering but refused by the transmit queue
    pub unsent: u64,
}

impl BurstSummary {
    /// Frames counted against the drop counter.
    pub fn dropped(&self) -> u64 {
        self.filtered + self.malformed + self.unsent
    }
}

impl AddAssign for BurstSummary {
    fn add_assign(&mut self, other: Self) {
        self.received += other.received;
        self.forwarded += other.forwarded;
        self.filtered += other.filtered;
        self.non_ip += other.non_ip;
        self.malformed += other.malformed;
        self.unsent += other.unsent;
    }
}

/// Forwarding state for one assignment.
pub struct ForwardingWorker {
    assignment: QueueAssignment,
    queues: Arc<dyn PortQueues>,
    blocklist: Arc<BlockList>,
    stats: Arc<StatsRegistry>,
    dst_mac: EthernetAddress,
    burst_size: usize,
    /// Frames drained this iteration
    rx: Vec<PacketBuf>,
    /// Frames that survived filtering, in drain order
    forward: Vec<PacketBuf>,
}

impl ForwardingWorker {
    pub fn new(
        assignment: QueueAssignment,
        queues: Arc<dyn PortQueues>,
        blocklist: Arc<BlockList>,
        stats: Arc<StatsRegistry>,
        dst_mac: [u8; 6],
    ) -> Self {
        Self {
            assignment,
            queues,
            blocklist,
            stats,
            dst_mac: EthernetAddress(dst_mac),
            burst_size: MAX_BURST,
            rx: Vec::with_capacity(MAX_BURST),
            forward: Vec::with_capacity(MAX_BURST),
        }
    }

    /// Limit the burst size, clamped to `1..=MAX_BURST`.
    pub fn with_burst_size(mut self, burst_size: usize) -> Self {
        self.burst_size = burst_size.clamp(1, MAX_BURST);
        self
    }

    /// Run a single receive/filter/transmit iteration.
    pub fn poll_once(&mut self) -> BurstSummary {
        let QueueAssignment {
            port,
            partner,
            queue,
            ..
        } = self.assignment;
        let mut summary = BurstSummary::default();

        let received = match self
            .queues
            .rx_burst(partner, queue, &mut self.rx, self.burst_size)
        {
            Ok(n) => n,
            Err(e) => {
                trace!(port = %partner, queue = %queue, error = %e, "Receive failed");
                self.rx.clear();
                return summary;
            }
        };
        if received == 0 {
            return summary;
        }

        let rx_bytes: u64 = self.rx.iter().map(|p| p.len() as u64).sum();
        self.stats
            .record_rx(partner, self.rx.len() as u64, rx_bytes);
        summary.received = self.rx.len() as u64;

        for mut pkt in self.rx.drain(..) {
            match classify(&pkt) {
                FrameKind::Ipv4 { src } if self.blocklist.is_blocked(src) => {
                    summary.filtered += 1;
                    pkt.release();
                }
                FrameKind::Ipv4 { .. } => {
                    rewrite_dst_mac(&mut pkt, self.dst_mac);
                    self.forward.push(pkt);
                }
                FrameKind::NonIpv4 => {
                    summary.non_ip += 1;
                    pkt.release();
                }
                FrameKind::Truncated => {
                    summary.malformed += 1;
                    pkt.release();
                }
            }
        }

        let policy_drops = summary.filtered + summary.malformed;
        if policy_drops > 0 {
            self.stats.record_drop(partner, policy_drops);
        }

        if self.forward.is_empty() {
            return summary;
        }

        let submitted = self.forward.len();
        let submitted_bytes: u64 = self.forward.iter().map(|p| p.len() as u64).sum();
        let accepted = self.queues.tx_burst(port, queue, &mut self.forward);
        debug_assert_eq!(accepted + self.forward.len(), submitted);

        let unsent = self.forward.len();
        let unsent_bytes: u64 = self.forward.iter().map(|p| p.len() as u64).sum();
        let sent = submitted - unsent;
        if sent > 0 {
            self.stats
                .record_tx(port, sent as u64, submitted_bytes - unsent_bytes);
        }
        summary.forwarded = sent as u64;

        if unsent > 0 {
            // Releases every refused buffer
            self.forward.clear();
            self.stats.record_drop(partner, unsent as u64);
            summary.unsent = unsent as u64;
        }

        summary
    }

    /// Poll until `stop` is set. Returns the accumulated summary.
    pub fn run(&mut self, stop: &AtomicBool) -> BurstSummary {
        let mut totals = BurstSummary::default();
        while !stop.load(Ordering::Relaxed) {
            totals += self.poll_once();
        }
        totals
    }
}

/// Handle to a running worker thread
pub struct WorkerHandle {
    thread: Option<JoinHandle<BurstSummary>>,
    shutdown: Arc<AtomicBool>,
    pub assignment: QueueAssignment,
}

impl WorkerHandle {
    /// Signal the worker to stop
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Wait for the worker to finish and return what it processed
    pub fn join(mut self) -> Result<BurstSummary, String> {
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| "Worker thread panicked".to_string()),
            None => Ok(BurstSummary::default()),
        }
    }

    /// Check if the worker is still running
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn a pinned thread running `worker` until `shutdown` is set.
pub fn spawn_worker(
    mut worker: ForwardingWorker,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<WorkerHandle> {
    let assignment = worker.assignment;
    let stop = Arc::clone(&shutdown);

    let thread = thread::Builder::new()
        .name(format!("fwd-p{}q{}", assignment.port, assignment.queue))
        .spawn(move || {
            if let Err(e) = cpu::pin_current_thread(assignment.cpu) {
                warn!(
                    cpu = assignment.cpu,
                    error = %e,
                    "Could not pin worker, performance will not be optimal"
                );
            }

            info!(
                cpu = assignment.cpu,
                port = %assignment.port,
                partner = %assignment.partner,
                queue = %assignment.queue,
                "Starting worker"
            );

            let totals = worker.run(&stop);

            info!(
                port = %assignment.port,
                queue = %assignment.queue,
                received = totals.received,
                forwarded = totals.forwarded,
                dropped = totals.dropped(),
                "Worker stopped"
            );
            totals
        })?;

    Ok(WorkerHandle {
        thread: Some(thread),
        shutdown,
        assignment,
    })
}
