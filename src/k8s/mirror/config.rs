/**
 * Configuration constants for the mirror engine and its watch supervisors
 */
use std::time::Duration;

/// Initial backoff time in seconds
pub const INITIAL_BACKOFF_SECONDS: u64 = 1;

/// Maximum backoff time in seconds between restart attempts
pub const MAX_BACKOFF_SECONDS: u64 = 300;

/// A sync that stayed up at least this long counts as healthy and resets backoff
pub const HEALTHY_RUN_SECONDS: u64 = 10;

/// Brief delay before re-listing after a watch stream ended cleanly
pub const RESTART_DELAY_SECONDS: u64 = 1;

/// Watch stream timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
pub const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Upper bound on how long `ClusterMirror::shutdown` waits for each supervisor task
pub const SHUTDOWN_GRACE_SECONDS: u64 = 5;

/// Exponential backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// First delay, and the value a healthy run resets to
    pub floor: Duration,
    /// Delays never grow past this
    pub ceiling: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(INITIAL_BACKOFF_SECONDS),
            ceiling: Duration::from_secs(MAX_BACKOFF_SECONDS),
        }
    }
}

/// Tunables shared by every watch supervisor
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub backoff: BackoffConfig,
    /// Minimum sync duration that resets the backoff to its floor
    pub healthy_after: Duration,
    /// Pause after a cleanly closed watch before the next list
    pub restart_delay: Duration,
    /// How long `shutdown` waits for a single supervisor to exit
    pub shutdown_grace: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            healthy_after: Duration::from_secs(HEALTHY_RUN_SECONDS),
            restart_delay: Duration::from_secs(RESTART_DELAY_SECONDS),
            shutdown_grace: Duration::from_secs(SHUTDOWN_GRACE_SECONDS),
        }
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(INITIAL_BACKOFF_SECONDS > 0, "INITIAL_BACKOFF_SECONDS must be greater than 0");
    assert!(
        MAX_BACKOFF_SECONDS >= INITIAL_BACKOFF_SECONDS,
        "MAX_BACKOFF_SECONDS must not be below INITIAL_BACKOFF_SECONDS"
    );
    assert!(HEALTHY_RUN_SECONDS > 0, "HEALTHY_RUN_SECONDS must be greater than 0");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(RESTART_DELAY_SECONDS > 0, "RESTART_DELAY_SECONDS must be greater than 0");
    assert!(SHUTDOWN_GRACE_SECONDS > 0, "SHUTDOWN_GRACE_SECONDS must be greater than 0");
};
