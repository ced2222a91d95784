//! Blocked source-address list.
//!
//! Filled once at startup and shared read-only with all workers. The table is
//! small enough that a linear scan beats hashing.

use std::net::Ipv4Addr;

use thiserror::Error;

/// Maximum number of blocked addresses.
pub const MAX_BLOCKED: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Block list is full ({} entries)", MAX_BLOCKED)]
    Full,

    #[error("Invalid IPv4 address: {0}")]
    InvalidAddress(String),
}

/// Fixed-capacity set of blocked IPv4 source addresses.
#[derive(Debug, Clone)]
pub struct BlockList {
    entries: [Ipv4Addr; MAX_BLOCKED],
    len: usize,
}

impl BlockList {
    pub fn new() -> Self {
        Self {
            entries: [Ipv4Addr::UNSPECIFIED; MAX_BLOCKED],
            len: 0,
        }
    }

    /// Parse a dotted-decimal address and add it.
    pub fn add(&mut self, addr: &str) -> Result<(), FilterError> {
        let parsed = addr
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| FilterError::InvalidAddress(addr.to_string()))?;
        self.insert(parsed)
    }

    /// Add an address. Duplicates are stored like any other entry.
    pub fn insert(&mut self, addr: Ipv4Addr) -> Result<(), FilterError> {
        if self.len >= MAX_BLOCKED {
            return Err(FilterError::Full);
        }
        self.entries[self.len] = addr;
        self.len += 1;
        Ok(())
    }

    #[inline]
    pub fn is_blocked(&self, addr: Ipv4Addr) -> bool {
        self.entries[..self.len].contains(&addr)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Ipv4Addr> {
        self.entries[..self.len].iter()
    }
}

impl Default for BlockList {
    fn default() -> Self {
        Self::new()
    }
}
