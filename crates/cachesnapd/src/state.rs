//! Daemon identity and uptime.

use std::time::Instant;

pub struct DaemonState {
    pub version: String,
    pub start_time: Instant,
}

impl DaemonState {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
