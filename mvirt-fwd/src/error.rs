//! Startup errors. Any of these aborts the forwarder.

use std::io;

use thiserror::Error;

use crate::assign::AssignError;
use crate::config::ConfigError;
use crate::dataplane::buffer::PoolError;

#[derive(Debug, Error)]
pub enum FwdError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue assignment failed: {0}")]
    Assign(#[from] AssignError),

    #[error("Exactly 2 ports are required, got {0}")]
    PortCount(usize),

    #[error("Cannot init port {name}: {source}")]
    Port { name: String, source: io::Error },

    #[error("Cannot create buffer pool: {0}")]
    Pool(#[from] PoolError),

    #[error("Cannot determine usable CPUs: {0}")]
    Cpu(#[from] nix::errno::Errno),

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, FwdError>;
