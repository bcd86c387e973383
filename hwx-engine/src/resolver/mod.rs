//! Catalog resolver
//!
//! Maps a raw identifier (model name, part number, free text or product URL)
//! to catalog entries of one category. Scoring is deterministic: identical
//! normalized input against an identical catalog yields identical output.

pub mod url;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use strsim::normalized_levenshtein;

use crate::cache::{fingerprint, CacheNamespace, FingerprintCache};
use crate::catalog::CatalogStore;
use crate::collaborators::Normalizer;
use crate::error::EngineResult;
use crate::types::{CanonicalEntry, ComponentCategory, MatchStrategy, ResolveCandidate};

pub const PART_NUMBER_CONTAINED_SCORE: f64 = 0.98;
pub const MODEL_CONTAINED_SCORE: f64 = 0.95;
pub const FUZZY_MODEL_THRESHOLD: f64 = 0.70;
pub const FUZZY_MODEL_SCALE: f64 = 0.90;
pub const FUZZY_PART_NUMBER_THRESHOLD: f64 = 0.80;
pub const FUZZY_PART_NUMBER_SCALE: f64 = 0.85;
pub const BRAND_TOKENS_BASE: f64 = 0.60;
pub const BRAND_TOKENS_STEP: f64 = 0.10;
/// Keeps brand-token scores within [0, 1] however many tokens are shared
pub const BRAND_TOKENS_MAX: f64 = 1.0;
/// Shortest model token that counts as shared
pub const MIN_SHARED_TOKEN_LEN: usize = 4;

/// Candidates scoring at or below this are dropped
pub const MIN_CANDIDATE_SCORE: f64 = 0.50;
pub const MAX_CANDIDATES: usize = 5;
pub const EXACT_MATCH_SCORE: f64 = 0.95;

/// Outcome of resolving an identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Resolution {
    /// One unambiguous entry
    Exact(ResolveCandidate),
    /// Caller must choose; best first
    Candidates(Vec<ResolveCandidate>),
    NoMatch,
}

impl Resolution {
    pub fn candidates(&self) -> Vec<&ResolveCandidate> {
        match self {
            Self::Exact(candidate) => vec![candidate],
            Self::Candidates(candidates) => candidates.iter().collect(),
            Self::NoMatch => Vec::new(),
        }
    }
}

/// Fuzzy model score for a similarity, `None` at or below the threshold
pub fn score_fuzzy_model(similarity: f64) -> Option<f64> {
    (similarity > FUZZY_MODEL_THRESHOLD).then(|| similarity * FUZZY_MODEL_SCALE)
}

/// Fuzzy part number score for a similarity, `None` at or below the threshold
pub fn score_fuzzy_part_number(similarity: f64) -> Option<f64> {
    (similarity > FUZZY_PART_NUMBER_THRESHOLD).then(|| similarity * FUZZY_PART_NUMBER_SCALE)
}

/// Score one entry against a normalized identifier
///
/// Rules are tried in order and the first that applies decides.
pub fn score_entry(
    normalized: &str,
    entry: &CanonicalEntry,
    normalizer: &dyn Normalizer,
) -> Option<(f64, MatchStrategy)> {
    let model = normalizer.normalize(&entry.model);
    let part_number = entry
        .part_number
        .as_deref()
        .map(|pn| normalizer.normalize(pn))
        .filter(|pn| !pn.is_empty());
    let brand = normalizer.normalize(&entry.brand);

    if let Some(pn) = &part_number {
        if normalized.contains(pn.as_str()) {
            return Some((PART_NUMBER_CONTAINED_SCORE, MatchStrategy::ExactPartNumber));
        }
    }

    if !model.is_empty() && normalized.contains(model.as_str()) {
        return Some((MODEL_CONTAINED_SCORE, MatchStrategy::ExactModel));
    }

    if !model.is_empty() {
        if let Some(score) = score_fuzzy_model(normalized_levenshtein(normalized, &model)) {
            return Some((score, MatchStrategy::FuzzyModel));
        }
    }

    if let Some(pn) = &part_number {
        if let Some(score) = score_fuzzy_part_number(normalized_levenshtein(normalized, pn)) {
            return Some((score, MatchStrategy::FuzzyPartNumber));
        }
    }

    brand_token_score(normalized, &brand, &model).map(|score| (score, MatchStrategy::BrandTokens))
}

fn brand_token_score(normalized: &str, brand: &str, model: &str) -> Option<f64> {
    if brand.is_empty() {
        return None;
    }
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let brand_tokens: Vec<&str> = brand.split_whitespace().collect();
    let brand_present = tokens
        .windows(brand_tokens.len())
        .any(|window| window == brand_tokens.as_slice());
    if !brand_present {
        return None;
    }

    let model_tokens: HashSet<&str> = model.split_whitespace().collect();
    let shared = tokens
        .iter()
        .filter(|t| t.chars().count() >= MIN_SHARED_TOKEN_LEN && model_tokens.contains(*t))
        .collect::<HashSet<_>>()
        .len();
    if shared == 0 {
        return None;
    }

    Some((BRAND_TOKENS_BASE + BRAND_TOKENS_STEP * (shared - 1) as f64).min(BRAND_TOKENS_MAX))
}

/// Rank entries (in catalog insertion order) against a normalized identifier
pub fn rank(normalized: &str, entries: &[CanonicalEntry], normalizer: &dyn Normalizer) -> Resolution {
    if normalized.is_empty() {
        return Resolution::NoMatch;
    }

    let mut scored: Vec<ResolveCandidate> = entries
        .iter()
        .filter_map(|entry| {
            score_entry(normalized, entry, normalizer).map(|(score, strategy)| ResolveCandidate {
                entry: entry.clone(),
                score,
                strategy,
                source_url: None,
            })
        })
        .filter(|c| c.score > MIN_CANDIDATE_SCORE)
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.entry.seq.cmp(&b.entry.seq))
    });
    scored.truncate(MAX_CANDIDATES);

    match scored.len() {
        0 => Resolution::NoMatch,
        1 if scored[0].score >= EXACT_MATCH_SCORE => {
            Resolution::Exact(scored.remove(0))
        }
        _ => Resolution::Candidates(scored),
    }
}

#[derive(Clone)]
pub struct CatalogResolver {
    store: Arc<dyn CatalogStore>,
    normalizer: Arc<dyn Normalizer>,
    cache: Option<FingerprintCache>,
}

impl CatalogResolver {
    pub fn new(store: Arc<dyn CatalogStore>, normalizer: Arc<dyn Normalizer>) -> Self {
        Self {
            store,
            normalizer,
            cache: None,
        }
    }

    /// Memoize resolutions in the fingerprint cache
    pub fn with_cache(mut self, cache: FingerprintCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn normalizer(&self) -> &Arc<dyn Normalizer> {
        &self.normalizer
    }

    /// Resolve a raw identifier within a category
    ///
    /// Allowlisted URLs take precedence over scoring. No match and an
    /// ambiguous match are values, not errors.
    pub async fn resolve(&self, raw: &str, category: ComponentCategory) -> EngineResult<Resolution> {
        let normalized = self.normalizer.normalize(raw);

        let cache_key = match &self.cache {
            Some(_) => {
                let revision = self.store.revision().await?;
                Some(fingerprint(&format!("{}|{}|{}", category, normalized, revision)))
            }
            None => None,
        };

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get::<Resolution>(CacheNamespace::Inputs, key).await? {
                tracing::debug!(category = %category, input = %normalized, "Resolution cache hit");
                return Ok(hit);
            }
        }

        let entries = self.store.load_by_category(category).await?;

        let resolution = match url::resolve_url(raw, category, &entries) {
            Some(candidate) => Resolution::Exact(candidate),
            None => rank(&normalized, &entries, self.normalizer.as_ref()),
        };

        tracing::info!(
            category = %category,
            input = %normalized,
            candidates = resolution.candidates().len(),
            exact = matches!(resolution, Resolution::Exact(_)),
            "Identifier resolved"
        );

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            cache.set(CacheNamespace::Inputs, key, &resolution).await?;
        }

        Ok(resolution)
    }
}
