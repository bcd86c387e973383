//! Anti-bot response detection
//!
//! Classifies a response (status + body) as a regular page or as an
//! anti-automation defense. Detection never fails; an unrecognized response
//! is simply not blocked.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How hard a block is to get past
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Challenge or denial that a retry with the same client will not pass
    Hard,
    /// Throttling or JavaScript gate; a browser or a later retry may pass
    Soft,
}

/// Result of inspecting a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub blocked: bool,
    pub reason: Option<String>,
    pub severity: Option<Severity>,
}

impl Detection {
    pub fn clear() -> Self {
        Self {
            blocked: false,
            reason: None,
            severity: None,
        }
    }

    pub fn blocked(reason: impl Into<String>, severity: Severity) -> Self {
        Self {
            blocked: true,
            reason: Some(reason.into()),
            severity: Some(severity),
        }
    }
}

/// Body pattern that marks a defense page
#[derive(Debug, Clone)]
pub struct Signature {
    pattern: Regex,
    reason: String,
    severity: Severity,
}

impl Signature {
    /// Case-insensitive signature from a regex pattern
    pub fn new(
        pattern: &str,
        reason: impl Into<String>,
        severity: Severity,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("(?i){}", pattern))?,
            reason: reason.into(),
            severity,
        })
    }
}

/// Ordered default signatures; the first match names the reason
const DEFAULT_SIGNATURES: &[(&str, &str, Severity)] = &[
    (
        r"checking your browser|just a moment\.\.\.|cf-browser-verification|cf-challenge",
        "cloudflare_challenge",
        Severity::Hard,
    ),
    (r"recaptcha", "recaptcha", Severity::Hard),
    (r"hcaptcha", "hcaptcha", Severity::Hard),
    (r"captcha", "captcha", Severity::Hard),
    (r"too many requests|rate limit", "rate_limit", Severity::Soft),
    (r"access denied", "access_denied", Severity::Hard),
    (r"bot detected|automated access", "bot_detected", Severity::Hard),
    (
        r"enable javascript|javascript is required",
        "js_required",
        Severity::Soft,
    ),
];

static DEFAULT_SET: Lazy<Vec<Signature>> = Lazy::new(|| {
    DEFAULT_SIGNATURES
        .iter()
        .map(|(pattern, reason, severity)| {
            Signature::new(pattern, *reason, *severity).expect("valid default signature")
        })
        .collect()
});

/// Error-message fragments that indicate a defense rather than a network fault
static ANTIBOT_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)cloudflare|captcha|rate limit|too many requests|access denied|\b403\b|forbidden|blocked|bot detected",
    )
    .expect("valid anti-bot error regex")
});

static PRODUCT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)specification|<table|<dl|datasheet|features").expect("valid product regex")
});

/// Minimum length of something that can be a product page
const MIN_PRODUCT_PAGE_LEN: usize = 1000;

#[derive(Debug, Clone)]
pub struct AntiBotDetector {
    signatures: Vec<Signature>,
}

impl Default for AntiBotDetector {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_SET.clone(),
        }
    }
}

impl AntiBotDetector {
    /// Detector with a custom signature set (status checks are always on)
    pub fn with_signatures(signatures: Vec<Signature>) -> Self {
        Self { signatures }
    }

    /// Inspect a response
    ///
    /// `status` is `None` for content that did not come with an HTTP
    /// status, such as a page source read from a browser.
    pub fn detect(&self, body: &str, status: Option<u16>) -> Detection {
        if let Some(detection) = status.and_then(status_block) {
            return detection;
        }

        if let Some(sig) = self.signatures.iter().find(|s| s.pattern.is_match(body)) {
            return Detection::blocked(sig.reason.clone(), sig.severity);
        }

        // A body of only whitespace is a stripped response, not a page
        if !body.is_empty() && body.trim().is_empty() {
            return Detection::blocked("empty_response", Severity::Soft);
        }

        Detection::clear()
    }

    /// Heuristic: long enough, has spec markup, and is not a challenge page
    pub fn is_likely_product_page(&self, body: &str) -> bool {
        body.len() >= MIN_PRODUCT_PAGE_LEN
            && PRODUCT_MARKERS.is_match(body)
            && !self.detect(body, None).blocked
    }
}

fn status_block(status: u16) -> Option<Detection> {
    match status {
        403 => Some(Detection::blocked("http_forbidden", Severity::Hard)),
        429 => Some(Detection::blocked("http_rate_limit", Severity::Soft)),
        503 => Some(Detection::blocked("http_service_unavailable", Severity::Soft)),
        520..=530 => Some(Detection::blocked(
            format!("cloudflare_error_{}", status),
            Severity::Hard,
        )),
        _ => None,
    }
}

/// True if a transport error message describes a defense
pub fn is_antibot_error(message: &str) -> bool {
    !message.is_empty() && ANTIBOT_ERROR.is_match(message)
}
