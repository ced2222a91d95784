//! Mapping of worker CPUs to (port, queue) pairs.

use std::fmt;

use thiserror::Error;

use crate::dataplane::{PortId, QueueId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssignError {
    #[error("At least one queue is required")]
    NoQueues,

    #[error("Need {needed} worker cores but only {available} are available")]
    InsufficientCores { needed: usize, available: usize },

    #[error("Port {0} is not part of the topology")]
    UnknownPort(PortId),
}

/// Which port each port forwards from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    partners: Vec<PortId>,
}

impl Topology {
    /// Port 0 and port 1 bridged to each other.
    pub fn two_port() -> Self {
        Self {
            partners: vec![PortId(1), PortId(0)],
        }
    }

    /// Build from an explicit partner list, indexed by port id.
    pub fn from_partners(partners: Vec<PortId>) -> Self {
        Self { partners }
    }

    pub fn port_count(&self) -> usize {
        self.partners.len()
    }

    /// Port whose traffic is transmitted on `port`.
    pub fn partner(&self, port: PortId) -> Option<PortId> {
        self.partners.get(port.index()).copied()
    }
}

/// Binding of one worker to the queue it transmits on and the queue it drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAssignment {
    /// CPU the worker is pinned to
    pub cpu: usize,
    /// Port the worker transmits on
    pub port: PortId,
    /// Port the worker receives from
    pub partner: PortId,
    /// Queue index used on both ports
    pub queue: QueueId,
}

impl fmt::Display for QueueAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu {}: port {} <- port {} queue {}",
            self.cpu, self.port, self.partner, self.queue
        )
    }
}

/// Assign worker CPUs to queues.
///
/// `cpus` lists the usable CPUs in ascending order. The first one is kept for
/// the main and reporter threads; the rest are worker contexts. For each port
/// in `egress`, queues `0..queue_count` go to consecutive worker CPUs. CPUs
/// left over stay idle.
pub fn assign(
    cpus: &[usize],
    queue_count: u16,
    egress: &[PortId],
    topology: &Topology,
) -> Result<Vec<QueueAssignment>, AssignError> {
    if queue_count == 0 {
        return Err(AssignError::NoQueues);
    }

    let workers = cpus.get(1..).unwrap_or_default();
    let needed = queue_count as usize * egress.len();
    if needed > workers.len() {
        return Err(AssignError::InsufficientCores {
            needed,
            available: workers.len(),
        });
    }

    let mut cores = workers.iter().copied();
    let mut assignments = Vec::with_capacity(needed);
    for &port in egress {
        let partner = topology
            .partner(port)
            .ok_or(AssignError::UnknownPort(port))?;

        for queue in 0..queue_count {
            // Length checked above
            let Some(cpu) = cores.next() else {
                break;
            };
            assignments.push(QueueAssignment {
                cpu,
                port,
                partner,
                queue: QueueId(queue),
            });
        }
    }

    Ok(assignments)
}
