//! Domains known to defend against lightweight clients
//!
//! Process-wide and shared between concurrent chain walks. Membership only
//! changes the fetch strategy for a domain, never the order of a chain.

use dashmap::DashSet;
use std::sync::Arc;

use crate::allowlist::host_of;

/// Cloneable handle over the shared set; clones see the same domains
#[derive(Debug, Clone, Default)]
pub struct BlockedDomainSet {
    domains: Arc<DashSet<String>>,
}

impl BlockedDomainSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a domain; returns true if it was not already blocked
    pub fn insert(&self, domain: &str) -> bool {
        let domain = normalize(domain);
        let added = self.domains.insert(domain.clone());
        if added {
            tracing::info!(domain = %domain, "Domain added to blocked set");
        }
        added
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains(&normalize(domain))
    }

    /// Whether the host of `url` is blocked
    pub fn contains_url(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.contains(&host))
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Sorted snapshot, for logs and reports
    pub fn snapshot(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.domains.iter().map(|d| d.clone()).collect();
        domains.sort();
        domains
    }

    pub fn reset(&self) {
        self.domains.clear();
    }
}

fn normalize(domain: &str) -> String {
    let domain = domain.trim().to_ascii_lowercase();
    domain.strip_prefix("www.").map(str::to_string).unwrap_or(domain)
}
