//! Fetch engine
//!
//! Retrieves one target with escalation: lightweight HTTP first, a real
//! browser when the lightweight client is blocked or the domain is already
//! known to block it. Every attempt is throttled per domain and bounded by
//! the configured per-attempt timeout.

pub mod blocklist;
pub mod browser;
pub mod detector;
pub mod http;
pub mod throttle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::allowlist::{domain_matches, host_of, is_allowlisted};
use blocklist::BlockedDomainSet;
use detector::{AntiBotDetector, Severity};
use hwx_common::config::EngineConfig;
use throttle::DomainThrottle;

/// How a page is retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Plain HTTP client
    Lightweight,
    /// Real browser session
    Heavyweight,
}

impl FetchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lightweight => "lightweight",
            Self::Heavyweight => "heavyweight",
        }
    }
}

/// Retrieved page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub body: String,
    /// HTTP status, when the fetcher sees one
    pub status: Option<u16>,
    pub final_url: String,
}

/// Network-level failure
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportErrorKind {
    #[error("timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("host is not allowlisted")]
    NotAllowlisted,

    #[error("browser session error: {0}")]
    Session(String),

    #[error("{0}")]
    Other(String),
}

impl TransportErrorKind {
    /// Whether retrying the same target can help
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotAllowlisted | Self::Status(400..=499))
    }
}

/// Result of one fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Content(Page),
    Blocked { reason: String, severity: Severity },
    TransportError { kind: TransportErrorKind },
}

/// A way of retrieving pages
#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn strategy(&self) -> FetchStrategy;

    async fn fetch(&self, target: &str, timeout: Duration) -> FetchOutcome;
}

/// Engine-level result of fetching a target
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub outcome: FetchOutcome,
    /// Strategy of the last attempt made
    pub strategy: FetchStrategy,
    /// Lightweight was blocked and the heavyweight retry ran
    pub escalated: bool,
    pub elapsed: Duration,
}

/// Strategy selection, escalation, throttling and timeouts
#[derive(Clone)]
pub struct FetchEngine {
    light: Arc<dyn PageFetcher>,
    heavy: Arc<dyn PageFetcher>,
    detector: AntiBotDetector,
    blocked: BlockedDomainSet,
    throttle: DomainThrottle,
    timeout: Duration,
    /// Domains accepted in addition to the built-in allowlist
    extra_domains: Arc<Vec<String>>,
}

impl FetchEngine {
    pub fn new(
        light: Arc<dyn PageFetcher>,
        heavy: Arc<dyn PageFetcher>,
        blocked: BlockedDomainSet,
        config: &EngineConfig,
    ) -> Self {
        Self {
            light,
            heavy,
            detector: AntiBotDetector::default(),
            blocked,
            throttle: DomainThrottle::new(&config.domain_throttle_seconds),
            timeout: Duration::from_millis(config.fetch_timeout_ms),
            extra_domains: Arc::new(Vec::new()),
        }
    }

    pub fn with_detector(mut self, detector: AntiBotDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Accept additional domains (private mirrors, test hosts)
    pub fn with_extra_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_domains = Arc::new(
            domains
                .into_iter()
                .map(|d| d.into().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    pub fn detector(&self) -> &AntiBotDetector {
        &self.detector
    }

    pub fn blocked_domains(&self) -> &BlockedDomainSet {
        &self.blocked
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether `target` may be fetched at all
    pub fn permits(&self, target: &str) -> bool {
        if is_allowlisted(target) {
            return true;
        }
        host_of(target).is_some_and(|host| {
            self.extra_domains
                .iter()
                .any(|domain| domain_matches(&host, domain))
        })
    }

    /// Fetch `target`, escalating to the browser when the lightweight client is blocked
    pub async fn fetch(&self, target: &str, preferred: FetchStrategy) -> FetchReport {
        let started = Instant::now();

        let host = match host_of(target) {
            Some(host) if self.permits(target) => host,
            _ => {
                tracing::warn!(target, "Refusing to fetch non-allowlisted target");
                return FetchReport {
                    outcome: FetchOutcome::TransportError {
                        kind: TransportErrorKind::NotAllowlisted,
                    },
                    strategy: preferred,
                    escalated: false,
                    elapsed: started.elapsed(),
                };
            }
        };

        if preferred == FetchStrategy::Heavyweight || self.blocked.contains(&host) {
            let outcome = self.attempt(&*self.heavy, target, &host).await;
            return FetchReport {
                outcome,
                strategy: FetchStrategy::Heavyweight,
                escalated: false,
                elapsed: started.elapsed(),
            };
        }

        let outcome = self.attempt(&*self.light, target, &host).await;
        let blocked = match &outcome {
            FetchOutcome::Blocked { reason, severity } => Some((reason.clone(), *severity)),
            _ => None,
        };
        let Some((reason, severity)) = blocked else {
            return FetchReport {
                outcome,
                strategy: FetchStrategy::Lightweight,
                escalated: false,
                elapsed: started.elapsed(),
            };
        };

        tracing::info!(
            target,
            host = %host,
            reason = %reason,
            severity = ?severity,
            "Lightweight fetch blocked, retrying with browser"
        );
        self.blocked.insert(&host);

        let outcome = self.attempt(&*self.heavy, target, &host).await;
        FetchReport {
            outcome,
            strategy: FetchStrategy::Heavyweight,
            escalated: true,
            elapsed: started.elapsed(),
        }
    }

    /// One throttled, time-bounded attempt with anti-bot classification
    async fn attempt(&self, fetcher: &dyn PageFetcher, target: &str, host: &str) -> FetchOutcome {
        self.throttle.until_ready(host).await;

        let outcome = match tokio::time::timeout(self.timeout, fetcher.fetch(target, self.timeout)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::debug!(target, strategy = fetcher.strategy().as_str(), "Fetch attempt timed out");
                return FetchOutcome::TransportError {
                    kind: TransportErrorKind::Timeout,
                };
            }
        };

        match outcome {
            FetchOutcome::Content(page) => self.classify(page),
            other => other,
        }
    }

    fn classify(&self, page: Page) -> FetchOutcome {
        let detection = self.detector.detect(&page.body, page.status);
        if detection.blocked {
            return FetchOutcome::Blocked {
                reason: detection.reason.unwrap_or_else(|| "blocked".to_string()),
                severity: detection.severity.unwrap_or(Severity::Hard),
            };
        }
        match page.status {
            Some(status) if status >= 400 => FetchOutcome::TransportError {
                kind: TransportErrorKind::Status(status),
            },
            _ => FetchOutcome::Content(page),
        }
    }
}
