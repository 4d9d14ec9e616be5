//! Application state

use gatehouse_core::Gatekeeper;
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// The gatekeeper answering authorization requests
    pub gatekeeper: Arc<Gatekeeper>,

    /// Server start time
    pub start_time: Instant,

    /// Debug mode flag
    pub debug: bool,
}

impl AppState {
    /// Create new application state
    pub fn new(gatekeeper: Arc<Gatekeeper>) -> Self {
        Self::with_debug(gatekeeper, false)
    }

    /// Create application state with debug mode
    pub fn with_debug(gatekeeper: Arc<Gatekeeper>, debug: bool) -> Self {
        Self {
            gatekeeper,
            start_time: Instant::now(),
            debug,
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
