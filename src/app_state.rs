// =============================================================================
// Central Application State
// =============================================================================
//
// Ties the scanner, the session registry and the loaded configuration
// together for the HTTP / WebSocket handlers. Shared as `Arc<AppState>`.
//
// The only mutable state shared between sessions lives inside the scanner's
// PreviousRsiStore; everything else here is read-only after startup or
// internally synchronised.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use crate::runtime_config::RuntimeConfig;
use crate::scanner::UniverseScanner;
use crate::stream::SessionRegistry;

pub struct AppState {
    pub config: RuntimeConfig,
    pub scanner: Arc<UniverseScanner>,
    pub sessions: SessionRegistry,

    /// Instant when the service was started. Used for uptime reporting.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, scanner: Arc<UniverseScanner>) -> Self {
        Self {
            config,
            scanner,
            sessions: SessionRegistry::new(),
            start_time: std::time::Instant::now(),
        }
    }

    /// Delay between two pushes of a streaming session.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_secs)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
