//! Per-domain pacing state.

use std::time::Duration;

use tokio::time::Instant;

/// State for a single domain.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Interval the domain asked for via robots, if any.
    pub crawl_delay: Option<Duration>,
    /// Interval currently enforced (base interval, possibly backed off).
    pub current_interval: Duration,
    /// Start of the most recently reserved slot.
    pub last_slot: Option<Instant>,
    /// Consecutive successes since the last throttle response.
    pub consecutive_successes: u32,
    pub in_backoff: bool,
    pub total_admissions: u64,
    pub throttle_hits: u64,
}

impl DomainState {
    pub fn new(floor: Duration, crawl_delay: Option<Duration>) -> Self {
        Self {
            crawl_delay,
            current_interval: base_interval(floor, crawl_delay),
            last_slot: None,
            consecutive_successes: 0,
            in_backoff: false,
            total_admissions: 0,
            throttle_hits: 0,
        }
    }

    /// Interval without any backoff applied.
    pub fn base_interval(&self, floor: Duration) -> Duration {
        base_interval(floor, self.crawl_delay)
    }

    /// Reserve the next slot at or after `now` and return it.
    ///
    /// Slots for one domain are spaced at least `current_interval` apart.
    pub fn reserve(&mut self, now: Instant) -> Instant {
        let slot = match self.last_slot {
            Some(prev) => (prev + self.current_interval).max(now),
            None => now,
        };
        self.last_slot = Some(slot);
        self.total_admissions += 1;
        slot
    }

    /// Time until the next slot would be available.
    pub fn time_until_ready(&self, now: Instant) -> Duration {
        match self.last_slot {
            Some(prev) => (prev + self.current_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

/// The larger of the floor and the declared crawl-delay.
pub fn base_interval(floor: Duration, crawl_delay: Option<Duration>) -> Duration {
    crawl_delay.map_or(floor, |d| d.max(floor))
}
