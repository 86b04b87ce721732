//! Shared handler state

use shieldscan_engine::Orchestrator;
use std::time::Instant;

pub struct AppState {
    pub orchestrator: Orchestrator,
    started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
