//! Per-domain request throttling
//!
//! Domains listed in `domain_throttle_seconds` get one direct `governor`
//! limiter each; a host is throttled by the limiter of the configured
//! domain it belongs to (itself or a parent). Unlisted hosts are not
//! throttled.

use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::allowlist::domain_matches;

#[derive(Clone, Default)]
pub struct DomainThrottle {
    /// Configured domain → minimum seconds between requests
    intervals: Arc<BTreeMap<String, f64>>,
    /// Limiters created on first use, keyed by configured domain
    limiters: Arc<DashMap<String, Arc<DefaultDirectRateLimiter>>>,
}

impl DomainThrottle {
    pub fn new(domain_throttle_seconds: &BTreeMap<String, f64>) -> Self {
        let intervals = domain_throttle_seconds
            .iter()
            .filter(|(_, secs)| secs.is_finite() && **secs > 0.0)
            .map(|(domain, secs)| (normalize_domain(domain), *secs))
            .collect();
        Self {
            intervals: Arc::new(intervals),
            limiters: Arc::new(DashMap::new()),
        }
    }

    /// Configured domain governing `host` and its interval
    ///
    /// When several configured domains match, the longest interval wins.
    fn rule_for(&self, host: &str) -> Option<(&str, f64)> {
        self.intervals
            .iter()
            .filter(|(domain, _)| domain_matches(host, domain))
            .map(|(domain, secs)| (domain.as_str(), *secs))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// `None` when the host is unthrottled or its interval does not fit a `Duration`
    fn limiter_for(&self, host: &str) -> Option<Arc<DefaultDirectRateLimiter>> {
        let (domain, secs) = self.rule_for(host)?;
        let quota = Quota::with_period(Duration::try_from_secs_f64(secs).ok()?)?;
        let limiter = self
            .limiters
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(quota)))
            .clone();
        Some(limiter)
    }

    /// Wait until a request to `host` is permitted
    pub async fn until_ready(&self, host: &str) {
        if let Some(limiter) = self.limiter_for(host) {
            limiter.until_ready().await;
            tracing::trace!(host, "Throttle permit acquired");
        }
    }
}

fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().to_ascii_lowercase();
    domain.strip_prefix("www.").map(str::to_string).unwrap_or(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_longest_matching_interval_wins() {
        let throttle = DomainThrottle::new(&BTreeMap::from([
            ("crucial.com".to_string(), 1.0),
            ("www.shop.crucial.com".to_string(), 3.0),
            ("kingston.com".to_string(), 0.0),
        ]));

        assert_eq!(throttle.rule_for("crucial.com"), Some(("crucial.com", 1.0)));
        assert_eq!(throttle.rule_for("eu.shop.crucial.com"), Some(("shop.crucial.com", 3.0)));
        // Zero intervals are dropped
        assert_eq!(throttle.rule_for("kingston.com"), None);
        assert_eq!(throttle.rule_for("intel.com"), None);
    }

    #[tokio::test]
    async fn test_oversized_interval_disables_throttling() {
        let throttle = DomainThrottle::new(&BTreeMap::from([("x.example".to_string(), 1e30)]));
        assert_eq!(throttle.rule_for("x.example"), Some(("x.example", 1e30)));
        assert!(throttle.limiter_for("x.example").is_none());

        let start = Instant::now();
        throttle.until_ready("x.example").await;
        throttle.until_ready("x.example").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_second_request_waits_for_interval() {
        let throttle = DomainThrottle::new(&BTreeMap::from([("x.example".to_string(), 0.2)]));

        let start = Instant::now();
        throttle.until_ready("x.example").await;
        throttle.until_ready("www2.x.example").await;
        assert!(start.elapsed() >= Duration::from_millis(150));

        // Unthrottled hosts never wait
        let start = Instant::now();
        throttle.until_ready("y.example").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
