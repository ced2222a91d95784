pub mod assign;
pub mod config;
pub mod cpu;
pub mod dataplane;
pub mod error;
pub mod filter;
pub mod reporter;
pub mod stats;
pub mod test_util;
