//! Daemon configuration.
//!
//! Environment only; argument parsing belongs to the wrapper scripts:
//! - `TRITON_ZMQ_HOST` / `TRITON_ZMQ_PORT`: bind address (defaults
//!   `127.0.0.1:3515`)
//! - `TRITOND_OUTPUT_FILE`: write received records to this file as
//!   MessagePack instead of a backend (the debug sink)

use std::path::PathBuf;
use std::time::Duration;

use crate::batcher::{FLUSH_INTERVAL_MS, FLUSH_MAX_RECORDS};

pub const ENV_OUTPUT_FILE: &str = "TRITOND_OUTPUT_FILE";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind_endpoint: String,
    pub flush_max_records: usize,
    pub flush_interval: Duration,
    pub output_file: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        DaemonConfig {
            bind_endpoint: triton::config::zmq_endpoint(),
            flush_max_records: FLUSH_MAX_RECORDS,
            flush_interval: Duration::from_millis(FLUSH_INTERVAL_MS),
            output_file: std::env::var(ENV_OUTPUT_FILE).ok().map(PathBuf::from),
        }
    }
}
