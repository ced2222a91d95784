//! Port queue interface consumed by the forwarding workers.

use std::fmt;
use std::io;

use super::buffer::PacketBuf;

/// Identifier of a forwarding port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u16);

impl PortId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a receive/transmit queue pair on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(pub u16);

impl QueueId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Burst receive/transmit over a set of ports with an equal number of queues each.
///
/// A given (port, queue) receive side is polled by one worker and a given
/// transmit side is fed by one worker, but the same port may be read and
/// written from different threads at the same time.
pub trait PortQueues: Send + Sync {
    /// Number of ports.
    fn port_count(&self) -> usize;

    /// Append up to `max` received frames to `out` and return how many were added.
    ///
    /// An empty queue is `Ok(0)`. On error nothing is appended.
    fn rx_burst(
        &self,
        port: PortId,
        queue: QueueId,
        out: &mut Vec<PacketBuf>,
        max: usize,
    ) -> io::Result<usize>;

    /// Submit `pkts` for transmission.
    ///
    /// Accepted frames are removed from `pkts` and become owned by the
    /// interface. Frames that were not sent stay in `pkts`, in their original
    /// order, still owned by the caller. Returns the number accepted.
    fn tx_burst(&self, port: PortId, queue: QueueId, pkts: &mut Vec<PacketBuf>) -> usize;
}
