//! In-memory port queues backed by lock-free rings.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::dataplane::{BufferPool, PacketBuf, PortId, PortQueues, QueueId};

/// Ports whose queues are plain rings.
///
/// Tests inject frames into the receive rings and inspect what the workers
/// left in the transmit rings. The transmit ring capacity bounds how many
/// frames a single burst can place, which is how backpressure is simulated.
pub struct RingPorts {
    pool: Arc<BufferPool>,
    port_count: usize,
    queue_count: usize,
    rx: Vec<ArrayQueue<PacketBuf>>,
    tx: Vec<ArrayQueue<PacketBuf>>,
    fail_rx: AtomicBool,
}

impl RingPorts {
    pub fn new(
        port_count: usize,
        queue_count: usize,
        pool: Arc<BufferPool>,
        rx_capacity: usize,
        tx_capacity: usize,
    ) -> Self {
        let rings = port_count * queue_count;
        Self {
            pool,
            port_count,
            queue_count,
            rx: (0..rings)
                .map(|_| ArrayQueue::new(rx_capacity.max(1)))
                .collect(),
            tx: (0..rings)
                .map(|_| ArrayQueue::new(tx_capacity.max(1)))
                .collect(),
            fail_rx: AtomicBool::new(false),
        }
    }

    fn ring(&self, port: PortId, queue: QueueId) -> Option<usize> {
        (port.index() < self.port_count && queue.index() < self.queue_count)
            .then(|| port.index() * self.queue_count + queue.index())
    }

    /// Copy `frame` into a pool buffer and queue it for reception.
    ///
    /// Returns false if the pool is exhausted or the ring is full.
    pub fn inject(&self, port: PortId, queue: QueueId, frame: &[u8]) -> bool {
        let Some(ring) = self.ring(port, queue) else {
            return false;
        };
        let Some(buf) = self.pool.alloc_from(frame) else {
            return false;
        };
        self.rx[ring].push(buf).is_ok()
    }

    /// Take everything transmitted on (port, queue).
    pub fn take_tx(&self, port: PortId, queue: QueueId) -> Vec<PacketBuf> {
        let Some(ring) = self.ring(port, queue) else {
            return Vec::new();
        };
        std::iter::from_fn(|| self.tx[ring].pop()).collect()
    }

    /// Frames waiting in the receive ring of (port, queue).
    pub fn rx_pending(&self, port: PortId, queue: QueueId) -> usize {
        self.ring(port, queue).map_or(0, |r| self.rx[r].len())
    }

    /// Make every receive call fail until reset.
    pub fn set_rx_failure(&self, fail: bool) {
        self.fail_rx.store(fail, Ordering::SeqCst);
    }
}

impl PortQueues for RingPorts {
    fn port_count(&self) -> usize {
        self.port_count
    }

    fn rx_burst(
        &self,
        port: PortId,
        queue: QueueId,
        out: &mut Vec<PacketBuf>,
        max: usize,
    ) -> io::Result<usize> {
        if self.fail_rx.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected receive failure"));
        }
        let ring = self.ring(port, queue).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("No queue {queue} on port {port}"))
        })?;

        let mut n = 0;
        while n < max {
            let Some(buf) = self.rx[ring].pop() else {
                break;
            };
            out.push(buf);
            n += 1;
        }
        Ok(n)
    }

    fn tx_burst(&self, port: PortId, queue: QueueId, pkts: &mut Vec<PacketBuf>) -> usize {
        let Some(ring) = self.ring(port, queue) else {
            return 0;
        };
        let ring = &self.tx[ring];

        let room = ring.capacity() - ring.len();
        let accepted = room.min(pkts.len());
        for pkt in pkts.drain(..accepted) {
            // Single producer per ring, the room check holds
            let _ = ring.push(pkt);
        }
        accepted
    }
}
