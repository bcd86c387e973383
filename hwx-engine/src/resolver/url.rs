//! Resolution of allowlisted product URLs

use url::Url;

use crate::allowlist::{brand_for_url, classify_tier, host_of};
use crate::types::{CanonicalEntry, ComponentCategory, MatchStrategy, ResolveCandidate};

/// Locator key under which a user-supplied URL is recorded on a synthetic entry
pub const USER_URL_LOCATOR: &str = "user_url";

/// Comparable form of a URL: host without `www.`, path without trailing slash
///
/// Query and fragment are ignored; shops append tracking parameters freely.
pub fn comparable_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = host_of(raw.trim())?;
    let path = url.path().trim_end_matches('/').to_lowercase();
    Some(format!("{}{}", host, path))
}

/// Candidate for an allowlisted URL, `None` if `raw` is not one
///
/// A catalog entry that lists the URL among its locators wins; otherwise a
/// synthetic entry is derived from the URL itself.
pub fn resolve_url(raw: &str, category: ComponentCategory, entries: &[CanonicalEntry]) -> Option<ResolveCandidate> {
    let raw = raw.trim();
    classify_tier(raw)?;
    let wanted = comparable_url(raw)?;

    let known = entries.iter().find(|entry| {
        entry
            .locators
            .values()
            .any(|locator| comparable_url(locator).as_deref() == Some(wanted.as_str()))
    });

    let entry = match known {
        Some(entry) => entry.clone(),
        None => synthetic_entry(raw, category)?,
    };

    tracing::debug!(url = raw, id = %entry.id, known = known.is_some(), "Resolved allowlisted URL");

    Some(ResolveCandidate {
        entry,
        score: 1.0,
        strategy: MatchStrategy::Url,
        source_url: Some(raw.to_string()),
    })
}

/// Entry named after the last path segment of the URL
fn synthetic_entry(raw: &str, category: ComponentCategory) -> Option<CanonicalEntry> {
    let url = Url::parse(raw).ok()?;
    let slug = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| s.trim_end_matches(".html").replace(['-', '_'], " "))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| host_of(raw).unwrap_or_default());

    let brand = brand_for_url(raw).unwrap_or("Unknown");
    Some(CanonicalEntry::new(category, brand, slug, None).with_locator(USER_URL_LOCATOR, raw))
}
