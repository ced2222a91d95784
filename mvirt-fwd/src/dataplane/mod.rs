//! Data plane: per-queue forwarding workers
//!
//! Architecture:
//! - One busy-polling worker thread per (port, queue), pinned to its own CPU
//! - Frames live in a fixed buffer pool and move between owners, never copied
//! - Ports are reached through the `PortQueues` burst interface

pub mod buffer;
pub mod packet;
pub mod queue;
pub mod tap;
pub mod worker;

pub use buffer::{BUFFER_SIZE, BufferPool, PacketBuf, PoolError, PoolStats};
pub use packet::{DEFAULT_DST_MAC, FrameKind, classify, parse_mac, rewrite_dst_mac};
pub use queue::{PortId, PortQueues, QueueId};
pub use tap::{TapPort, TapPorts};
pub use worker::{BurstSummary, ForwardingWorker, MAX_BURST, WorkerHandle, spawn_worker};
