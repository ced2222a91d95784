//! Test utilities for exercising the data plane without NICs
//!
//! This module provides in-memory port queues and frame builders for unit and
//! integration tests.

pub mod packets;
pub mod ring;

pub use ring::RingPorts;
