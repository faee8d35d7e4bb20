//! Per-domain politeness gate.
//!
//! Every request to a domain must first obtain an [`Admission`]. Admissions
//! reserve slots spaced by the domain's interval: the larger of the floor
//! (0.5s by default) and the robots crawl-delay, stretched while the domain
//! is throttling us. State is process-local and starts empty.

mod config;
mod domain_state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use config::{DomainStats, GateConfig, DEFAULT_FLOOR};
use domain_state::DomainState;

use crate::utils::extract_domain;

/// A request was issued without a matching admission or before its slot.
#[derive(Debug, Error)]
#[error("politeness violation for {domain}: request issued {early_by:?} early")]
pub struct PolitenessViolation {
    pub domain: String,
    pub early_by: Duration,
}

/// Proof that a request to `domain` was admitted for `slot`.
#[derive(Debug, Clone)]
pub struct Admission {
    pub domain: String,
    pub slot: Instant,
}

/// Shared per-domain pacing state.
#[derive(Debug, Clone)]
pub struct PolitenessGate {
    config: GateConfig,
    domains: Arc<RwLock<HashMap<String, DomainState>>>,
}

impl PolitenessGate {
    pub fn new() -> Self {
        Self::with_config(GateConfig::default())
    }

    pub fn with_config(config: GateConfig) -> Self {
        Self {
            config,
            domains: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn floor(&self) -> Duration {
        self.config.floor
    }

    /// Reserve the next slot for `domain` and return how long the caller must
    /// wait before issuing its request.
    pub async fn admit(&self, domain: &str) -> Duration {
        self.reserve(domain).await.1
    }

    /// Reserve a slot for the URL's domain and sleep until it opens.
    ///
    /// Returns `None` if the URL has no host.
    pub async fn acquire(&self, url: &str) -> Option<Admission> {
        let domain = extract_domain(url)?;
        let (slot, wait) = self.reserve(&domain).await;

        if wait > Duration::ZERO {
            debug!("Politeness gate {}: waiting {:?}", domain, wait);
            tokio::time::sleep_until(slot).await;
        }

        Some(Admission { domain, slot })
    }

    /// Check that `admission` covers a request to `url` issued now.
    pub fn verify(&self, admission: &Admission, url: &str) -> Result<(), PolitenessViolation> {
        let domain = extract_domain(url).unwrap_or_default();
        if domain != admission.domain {
            return Err(PolitenessViolation {
                domain,
                early_by: self.config.floor,
            });
        }

        let now = Instant::now();
        if now < admission.slot {
            return Err(PolitenessViolation {
                domain,
                early_by: admission.slot - now,
            });
        }
        Ok(())
    }

    async fn reserve(&self, domain: &str) -> (Instant, Duration) {
        let now = Instant::now();
        let mut domains = self.domains.write().await;
        let state = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(self.config.floor, None));
        let slot = state.reserve(now);
        (slot, slot.saturating_duration_since(now))
    }

    /// Record the domain's robots crawl-delay. Backoff in progress is kept.
    pub async fn set_crawl_delay(&self, domain: &str, delay: Option<Duration>) {
        let mut domains = self.domains.write().await;
        let state = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(self.config.floor, delay));
        state.crawl_delay = delay;

        let base = state.base_interval(self.config.floor);
        if !state.in_backoff || state.current_interval < base {
            state.current_interval = base;
        }
        debug!("Domain {} interval set to {:?}", domain, state.current_interval);
    }

    /// Report a successful request; may shrink a backed-off interval.
    pub async fn report_success(&self, domain: &str) {
        let mut domains = self.domains.write().await;
        let Some(state) = domains.get_mut(domain) else {
            return;
        };
        state.consecutive_successes += 1;

        if state.in_backoff && state.consecutive_successes >= self.config.recovery_threshold {
            let base = state.base_interval(self.config.floor);
            let reduced = Duration::from_secs_f64(
                state.current_interval.as_secs_f64() * self.config.recovery_multiplier,
            );

            if reduced <= base {
                state.in_backoff = false;
                state.current_interval = base;
                info!("Domain {} recovered from rate limit backoff", domain);
            } else {
                state.current_interval = reduced;
                debug!("Domain {} interval reduced to {:?}", domain, reduced);
            }
            state.consecutive_successes = 0;
        }
    }

    /// Whether a status code means the server is throttling us.
    pub fn is_rate_limit(status: u16) -> bool {
        matches!(status, 429 | 503)
    }

    /// Report a throttling response (429/503); stretches the interval.
    pub async fn report_rate_limit(&self, domain: &str, status: u16) {
        let mut domains = self.domains.write().await;
        let Some(state) = domains.get_mut(domain) else {
            return;
        };
        state.throttle_hits += 1;
        state.consecutive_successes = 0;
        state.in_backoff = true;

        let stretched = Duration::from_secs_f64(
            state.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        state.current_interval = stretched.min(self.config.max_delay);

        warn!(
            "Rate limited by {} (HTTP {}), backing off to {:?}",
            domain, status, state.current_interval
        );
    }

    /// Time until the URL's domain can take another request.
    pub async fn time_until_ready(&self, url: &str) -> Duration {
        match extract_domain(url) {
            Some(domain) => self.domain_ready_in(&domain).await,
            None => Duration::ZERO,
        }
    }

    /// Time until `domain` can take another request.
    pub async fn domain_ready_in(&self, domain: &str) -> Duration {
        let now = Instant::now();
        self.domains
            .read()
            .await
            .get(domain)
            .map(|s| s.time_until_ready(now))
            .unwrap_or(Duration::ZERO)
    }

    pub async fn stats(&self) -> HashMap<String, DomainStats> {
        self.domains
            .read()
            .await
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    DomainStats {
                        interval: v.current_interval,
                        crawl_delay: v.crawl_delay,
                        in_backoff: v.in_backoff,
                        total_admissions: v.total_admissions,
                        throttle_hits: v.throttle_hits,
                    },
                )
            })
            .collect()
    }
}

impl Default for PolitenessGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crawl_delay_spaces_admissions() {
        let gate = PolitenessGate::new();
        gate.set_crawl_delay("tax.ny.gov", Some(Duration::from_secs(2)))
            .await;

        let first = gate.admit("tax.ny.gov").await;
        let second = gate.admit("tax.ny.gov").await;

        assert_eq!(first, Duration::ZERO);
        assert!(second >= Duration::from_millis(1990));
        assert!(second <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_floor_applies_without_crawl_delay() {
        let gate = PolitenessGate::new();
        let start = std::time::Instant::now();

        let a = gate.acquire("https://cdtfa.ca.gov/a").await.unwrap();
        gate.verify(&a, "https://cdtfa.ca.gov/a").unwrap();
        let b = gate.acquire("https://cdtfa.ca.gov/b").await.unwrap();
        gate.verify(&b, "https://cdtfa.ca.gov/b").unwrap();

        assert!(start.elapsed() >= Duration::from_millis(490));
        assert_eq!(b.slot - a.slot, DEFAULT_FLOOR);
    }

    #[tokio::test]
    async fn test_domains_are_independent() {
        let gate = PolitenessGate::new();
        gate.admit("a.gov").await;
        assert_eq!(gate.admit("b.gov").await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_domain_ready_in_tracks_reservations() {
        let gate = PolitenessGate::new();
        assert_eq!(gate.domain_ready_in("tax.utah.gov").await, Duration::ZERO);
        gate.admit("tax.utah.gov").await;
        assert!(gate.domain_ready_in("tax.utah.gov").await > Duration::ZERO);
        assert!(gate.time_until_ready("https://tax.utah.gov/x").await > Duration::ZERO);
        assert_eq!(gate.domain_ready_in("tax.idaho.gov").await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_do_not_share_slots() {
        let gate = PolitenessGate::new();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.admit("dor.wa.gov").await }));
        }
        let mut waits = Vec::new();
        for h in handles {
            waits.push(h.await.unwrap());
        }
        waits.sort();
        for pair in waits.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(490));
        }
    }

    #[tokio::test]
    async fn test_verify_rejects_early_request() {
        let gate = PolitenessGate::new();
        gate.admit("revenue.pa.gov").await;
        let (slot, _) = gate.reserve("revenue.pa.gov").await;
        let admission = Admission {
            domain: "revenue.pa.gov".to_string(),
            slot,
        };

        let err = gate
            .verify(&admission, "https://revenue.pa.gov/x")
            .unwrap_err();
        assert_eq!(err.domain, "revenue.pa.gov");
        assert!(err.early_by > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_verify_rejects_other_domain() {
        let gate = PolitenessGate::new();
        let admission = gate.acquire("https://a.gov/").await.unwrap();
        assert!(gate.verify(&admission, "https://b.gov/").is_err());
    }

    #[tokio::test]
    async fn test_backoff_and_recovery() {
        let gate = PolitenessGate::with_config(GateConfig {
            floor: Duration::from_millis(100),
            recovery_threshold: 1,
            ..Default::default()
        });
        gate.admit("example.gov").await;
        gate.report_rate_limit("example.gov", 429).await;

        let stats = gate.stats().await;
        let s = stats.get("example.gov").unwrap();
        assert!(s.in_backoff);
        assert_eq!(s.interval, Duration::from_millis(200));

        for _ in 0..4 {
            gate.report_success("example.gov").await;
        }
        let stats = gate.stats().await;
        let s = stats.get("example.gov").unwrap();
        assert!(!s.in_backoff);
        assert_eq!(s.interval, Duration::from_millis(100));
    }
}
