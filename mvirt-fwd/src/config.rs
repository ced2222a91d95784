//! Forwarder configuration.
//!
//! Values come from an optional JSON file, overridden by command-line flags.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::dataplane::buffer::NUM_BUFFERS_PER_PORT;
use crate::dataplane::packet::parse_mac;
use crate::dataplane::worker::MAX_BURST;
use crate::dataplane::PortId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Queue count must be at least 1")]
    NoQueues,

    #[error("Stats interval must be at least 1 second")]
    ZeroInterval,

    #[error("Burst size must be between 1 and {max}, got {got}", max = MAX_BURST)]
    BurstSize { got: usize },

    #[error("Buffer pool of {got} is too small, need at least {needed}")]
    PoolTooSmall { got: usize, needed: usize },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Runtime settings of the forwarder.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ForwarderConfig {
    /// RX/TX queues per port, one worker per queue and direction
    pub queues: u16,
    /// Seconds between statistics reports
    pub stats_interval_secs: u64,
    /// Destination MAC written into every forwarded frame
    pub dst_mac: String,
    /// Source addresses to drop
    pub blocked: Vec<String>,
    /// Also forward port 0 -> port 1
    pub bidirectional: bool,
    /// Number of packet buffers shared by all ports
    pub pool_size: usize,
    /// Frames drained per iteration
    pub burst_size: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            queues: 1,
            stats_interval_secs: 1,
            dst_mac: "00:11:22:33:44:55".to_string(),
            blocked: vec!["192.168.1.100".to_string(), "10.0.0.1".to_string()],
            bidirectional: false,
            pool_size: NUM_BUFFERS_PER_PORT * 2,
            burst_size: MAX_BURST,
        }
    }
}

impl ForwarderConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Check the settings that do not depend on the host.
    pub fn validate(&self) -> Result<()> {
        if self.queues == 0 {
            return Err(ConfigError::NoQueues);
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if !(1..=MAX_BURST).contains(&self.burst_size) {
            return Err(ConfigError::BurstSize {
                got: self.burst_size,
            });
        }
        self.dst_mac()?;

        // Every worker must be able to hold a full burst
        let needed = self.egress_ports().len() * self.queues as usize * self.burst_size;
        if self.pool_size < needed {
            return Err(ConfigError::PoolTooSmall {
                got: self.pool_size,
                needed,
            });
        }
        Ok(())
    }

    pub fn dst_mac(&self) -> Result<[u8; 6]> {
        parse_mac(&self.dst_mac).ok_or_else(|| ConfigError::InvalidMac(self.dst_mac.clone()))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Ports that get workers transmitting on them.
    pub fn egress_ports(&self) -> Vec<PortId> {
        if self.bidirectional {
            vec![PortId(0), PortId(1)]
        } else {
            vec![PortId(0)]
        }
    }
}
