//! Fixed-size packet buffer pool
//!
//! All frame storage is allocated once at startup. A [`PacketBuf`] owns one
//! slot while a frame is in flight and hands it back to the pool when it is
//! released or dropped. Because release consumes the buffer, a slot can only
//! ever be returned once.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;
use thiserror::Error;

/// Size of a single pool slot (1518-byte frame plus headroom).
pub const BUFFER_SIZE: usize = 2048;

/// Number of buffers per port in the default pool.
pub const NUM_BUFFERS_PER_PORT: usize = 8191;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Buffer pool must hold at least one buffer")]
    Empty,

    #[error("Buffer size must be non-zero")]
    ZeroBufferSize,
}

/// Counters describing pool usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers handed out since creation
    pub allocated: u64,
    /// Buffers returned since creation
    pub released: u64,
}

impl PoolStats {
    /// Buffers currently owned by someone other than the pool.
    ///
    /// The two counters are read separately, so a sample taken while frames
    /// are moving may be off by a few.
    pub fn outstanding(&self) -> u64 {
        self.allocated.saturating_sub(self.released)
    }
}

/// Lock-free pool of equally sized frame buffers.
pub struct BufferPool {
    free: ArrayQueue<Box<[u8]>>,
    buffer_size: usize,
    allocated: AtomicU64,
    released: AtomicU64,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of [`BUFFER_SIZE`] bytes.
    pub fn new(capacity: usize) -> Result<Arc<Self>, PoolError> {
        Self::with_buffer_size(capacity, BUFFER_SIZE)
    }

    /// Create a pool with a custom slot size.
    pub fn with_buffer_size(capacity: usize, buffer_size: usize) -> Result<Arc<Self>, PoolError> {
        if capacity == 0 {
            return Err(PoolError::Empty);
        }
        if buffer_size == 0 {
            return Err(PoolError::ZeroBufferSize);
        }

        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            // Cannot fail: exactly `capacity` pushes into a queue of that size.
            let _ = free.push(vec![0u8; buffer_size].into_boxed_slice());
        }

        Ok(Arc::new(Self {
            free,
            buffer_size,
            allocated: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }))
    }

    /// Take a buffer out of the pool. Returns `None` when the pool is exhausted.
    ///
    /// The returned buffer has length 0.
    pub fn alloc(self: &Arc<Self>) -> Option<PacketBuf> {
        let data = self.free.pop()?;
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Some(PacketBuf {
            data,
            len: 0,
            pool: Arc::clone(self),
        })
    }

    /// Take a buffer and fill it with a copy of `frame`.
    ///
    /// Returns `None` if the pool is exhausted or the frame does not fit.
    pub fn alloc_from(self: &Arc<Self>, frame: &[u8]) -> Option<PacketBuf> {
        if frame.len() > self.buffer_size {
            return None;
        }
        let mut buf = self.alloc()?;
        buf.data[..frame.len()].copy_from_slice(frame);
        buf.len = frame.len();
        Some(buf)
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    /// Number of slots currently in the pool.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }

    fn recycle(&self, data: Box<[u8]>) {
        self.released.fetch_add(1, Ordering::Relaxed);
        // Slots only come from this pool, so there is always room.
        let _ = self.free.push(data);
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

/// One frame's worth of pool storage, exclusively owned.
///
/// Dereferences to the valid frame bytes (`..len`).
pub struct PacketBuf {
    data: Box<[u8]>,
    len: usize,
    pool: Arc<BufferPool>,
}

impl PacketBuf {
    /// Length of the frame in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the underlying slot.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Whole slot, for receiving a frame into. Follow with [`set_len`](Self::set_len).
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Set the frame length, clamped to the slot size.
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// Return the slot to its pool.
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PacketBuf {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl DerefMut for PacketBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.recycle(data);
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}
