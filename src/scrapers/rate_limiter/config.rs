//! Politeness gate configuration and types.

use std::time::Duration;

/// Interval floor applied when a domain declares no crawl-delay.
pub const DEFAULT_FLOOR: Duration = Duration::from_millis(500);

/// Configuration for per-domain pacing.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Minimum interval between requests to the same domain.
    pub floor: Duration,
    /// Ceiling for throttling backoff.
    pub max_delay: Duration,
    /// Multiplier applied to the interval on 429/503.
    pub backoff_multiplier: f64,
    /// Multiplier applied while recovering (< 1.0 to decrease delay).
    pub recovery_multiplier: f64,
    /// Consecutive successes before the interval is reduced.
    pub recovery_threshold: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            floor: DEFAULT_FLOOR,
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.8,
            recovery_threshold: 5,
        }
    }
}

impl GateConfig {
    pub fn with_floor(mut self, floor: Duration) -> Self {
        self.floor = floor;
        self
    }
}

/// Statistics for a domain.
#[derive(Debug, Clone)]
pub struct DomainStats {
    pub interval: Duration,
    pub crawl_delay: Option<Duration>,
    pub in_backoff: bool,
    pub total_admissions: u64,
    pub throttle_hits: u64,
}
