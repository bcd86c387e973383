//! Cross-validation of per-source spec values
//!
//! A value is trusted only when at least two sources agree on it. Agreement
//! is exact (case and whitespace insensitive) unless the key has a numeric
//! tolerance configured.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{SourceTier, SpecField};
use hwx_common::config::EngineConfig;

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([-+]?\d+(?:\.\d+)?)").expect("valid number regex"));

/// How two values of a key are compared
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComparisonRule {
    Exact,
    /// Relative difference `|a - b| / max(|a|, |b|)` at most `tolerance`
    Numeric { tolerance: f64 },
}

impl ComparisonRule {
    pub fn equal(self, a: &str, b: &str) -> bool {
        match self {
            Self::Exact => exact_form(a) == exact_form(b),
            Self::Numeric { tolerance } => match (leading_number(a), leading_number(b)) {
                (Some(x), Some(y)) => {
                    let scale = x.abs().max(y.abs());
                    scale == 0.0 || (x - y).abs() / scale <= tolerance
                }
                _ => exact_form(a) == exact_form(b),
            },
        }
    }
}

fn exact_form(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Leading number of a value ("1.1V" -> 1.1, "5600 MT/s" -> 5600)
pub fn leading_number(value: &str) -> Option<f64> {
    LEADING_NUMBER
        .captures(value)
        .and_then(|caps| caps[1].parse().ok())
}

/// Fields one source produced in a chain run
#[derive(Debug, Clone)]
pub struct SourceObservation {
    pub source_id: String,
    /// Chain priority (lower is better)
    pub priority: u32,
    pub tier: SourceTier,
    pub fields: Vec<SpecField>,
}

/// Outcome for one spec key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KeyConsensus {
    /// Two or more sources agree
    Agreed {
        value: String,
        unit: Option<String>,
        /// Agreeing sources, best priority first
        sources: Vec<String>,
        /// Agreeing sources / reporting sources
        confidence: f64,
    },
    /// Only one source reported the key; never persisted as validated
    SingleSource {
        value: String,
        unit: Option<String>,
        source: String,
    },
    /// Several sources reported the key and no two agree
    NoConsensus {
        /// (source id, reported value) in priority order
        observations: Vec<(String, String)>,
    },
}

impl KeyConsensus {
    pub fn is_agreed(&self) -> bool {
        matches!(self, Self::Agreed { .. })
    }
}

/// Per-key consensus over one chain run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub keys: BTreeMap<String, KeyConsensus>,
    /// Sources that reported anything, best priority first
    pub sources: Vec<String>,
}

impl ConsensusResult {
    pub fn agreed(&self) -> impl Iterator<Item = (&String, &KeyConsensus)> {
        self.keys.iter().filter(|(_, c)| c.is_agreed())
    }

    pub fn has_agreement(&self) -> bool {
        self.agreed().next().is_some()
    }

    /// Sources that took part in at least one agreement, best priority first
    pub fn validation_sources(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|source| {
                self.agreed().any(|(_, c)| match c {
                    KeyConsensus::Agreed { sources, .. } => sources.contains(source),
                    _ => false,
                })
            })
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrossValidator {
    tolerances: BTreeMap<String, f64>,
}

/// One reported value, in priority order
struct Reported<'a> {
    source: &'a str,
    field: &'a SpecField,
    display: String,
}

impl CrossValidator {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_tolerances(config.consensus_tolerance_by_key.clone())
    }

    pub fn with_tolerances(tolerances: BTreeMap<String, f64>) -> Self {
        Self { tolerances }
    }

    pub fn rule_for(&self, key: &str) -> ComparisonRule {
        match self.tolerances.get(key) {
            Some(&tolerance) => ComparisonRule::Numeric { tolerance },
            None => ComparisonRule::Exact,
        }
    }

    /// Compute per-key consensus
    ///
    /// Observations are considered in priority order regardless of the
    /// order they are passed in.
    pub fn validate(&self, observations: &[SourceObservation]) -> ConsensusResult {
        let mut ordered: Vec<&SourceObservation> = observations.iter().collect();
        ordered.sort_by_key(|o| o.priority);

        let mut by_key: BTreeMap<&str, Vec<Reported<'_>>> = BTreeMap::new();
        let mut sources = Vec::new();

        for observation in &ordered {
            let mut reported_any = false;
            for field in observation.fields.iter().filter(|f| f.status().requires_provenance()) {
                let reports = by_key.entry(field.key()).or_default();
                // One vote per source per key
                if reports.iter().any(|r| r.source == observation.source_id) {
                    continue;
                }
                reports.push(Reported {
                    source: &observation.source_id,
                    field,
                    display: field.display_value(),
                });
                reported_any = true;
            }
            if reported_any && !sources.contains(&observation.source_id) {
                sources.push(observation.source_id.clone());
            }
        }

        let keys = by_key
            .into_iter()
            .map(|(key, reports)| (key.to_string(), self.decide(key, &reports)))
            .collect();

        ConsensusResult { keys, sources }
    }

    fn decide(&self, key: &str, reports: &[Reported<'_>]) -> KeyConsensus {
        if let [only] = reports {
            return KeyConsensus::SingleSource {
                value: only.field.value().to_string(),
                unit: only.field.unit().map(str::to_string),
                source: only.source.to_string(),
            };
        }

        let rule = self.rule_for(key);

        // Groups of mutually agreeing reports, one grown from each seed;
        // indices stay in priority order inside a group
        let mut best: Vec<usize> = Vec::new();
        for seed in 0..reports.len() {
            let mut group: Vec<usize> = Vec::new();
            for candidate in 0..reports.len() {
                let agrees = candidate == seed
                    || (rule.equal(&reports[seed].display, &reports[candidate].display)
                        && group
                            .iter()
                            .all(|&m| rule.equal(&reports[m].display, &reports[candidate].display)));
                if agrees {
                    group.push(candidate);
                }
            }
            // Larger wins; on a tie the group holding the better priority wins
            if group.len() > best.len() || (group.len() == best.len() && group[0] < best[0]) {
                best = group;
            }
        }

        if best.len() < 2 {
            tracing::debug!(key, reports = reports.len(), "No two sources agree");
            return KeyConsensus::NoConsensus {
                observations: reports
                    .iter()
                    .map(|r| (r.source.to_string(), r.display.clone()))
                    .collect(),
            };
        }

        let lead = &reports[best[0]];
        KeyConsensus::Agreed {
            value: lead.field.value().to_string(),
            unit: lead.field.unit().map(str::to_string),
            sources: best.iter().map(|&i| reports[i].source.to_string()).collect(),
            confidence: best.len() as f64 / reports.len() as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpecStatus;

    fn field(key: &str, value: &str, source: &str) -> SpecField {
        SpecField::sourced(
            key,
            value,
            SpecStatus::ExtractedOfficial,
            SourceTier::Official,
            source,
            format!("https://{}.example/p", source),
            0.9,
        )
        .unwrap()
    }

    fn observation(source: &str, priority: u32, fields: &[(&str, &str)]) -> SourceObservation {
        SourceObservation {
            source_id: source.to_string(),
            priority,
            tier: SourceTier::Official,
            fields: fields.iter().map(|(k, v)| field(k, v, source)).collect(),
        }
    }

    #[test]
    fn test_numeric_tolerance_groups() {
        let validator =
            CrossValidator::with_tolerances(BTreeMap::from([("cpu.tdp_w".to_string(), 0.05)]));
        let result = validator.validate(&[
            observation("a", 1, &[("cpu.tdp_w", "100")]),
            observation("b", 2, &[("cpu.tdp_w", "103")]),
            observation("c", 3, &[("cpu.tdp_w", "150")]),
        ]);

        match &result.keys["cpu.tdp_w"] {
            KeyConsensus::Agreed { value, sources, confidence, .. } => {
                assert_eq!(value, "100");
                assert_eq!(sources, &vec!["a".to_string(), "b".to_string()]);
                assert!((confidence - 2.0 / 3.0).abs() < 1e-9);
            }
            other => panic!("expected agreement, got {:?}", other),
        }
        assert_eq!(result.validation_sources(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_exact_rule_ignores_case_and_whitespace() {
        let result = CrossValidator::default().validate(&[
            observation("a", 1, &[("ram.form_factor", "UDIMM")]),
            observation("b", 2, &[("ram.form_factor", " udimm ")]),
        ]);
        assert!(result.keys["ram.form_factor"].is_agreed());
    }

    #[test]
    fn test_single_source_and_no_consensus() {
        let result = CrossValidator::default().validate(&[
            observation("a", 1, &[("ram.type", "DDR5"), ("ram.cas_latency", "CL46")]),
            observation("b", 2, &[("ram.type", "DDR4")]),
        ]);

        assert!(matches!(
            &result.keys["ram.cas_latency"],
            KeyConsensus::SingleSource { source, .. } if source == "a"
        ));
        assert!(matches!(&result.keys["ram.type"], KeyConsensus::NoConsensus { observations } if observations.len() == 2));
        assert!(!result.has_agreement());
        assert!(result.validation_sources().is_empty());
    }

    #[test]
    fn test_tie_goes_to_better_priority_group() {
        let result = CrossValidator::default().validate(&[
            observation("d", 4, &[("gpu.bus", "PCIe 4.0")]),
            observation("c", 3, &[("gpu.bus", "PCIe 4.0")]),
            observation("b", 2, &[("gpu.bus", "PCIe 5.0")]),
            observation("a", 1, &[("gpu.bus", "PCIe 5.0")]),
        ]);

        match &result.keys["gpu.bus"] {
            KeyConsensus::Agreed { value, sources, confidence, .. } => {
                assert_eq!(value, "PCIe 5.0");
                assert_eq!(sources, &vec!["a".to_string(), "b".to_string()]);
                assert!((confidence - 0.5).abs() < 1e-9);
            }
            other => panic!("expected agreement, got {:?}", other),
        }
    }

    #[test]
    fn test_unparsable_numeric_falls_back_to_exact() {
        let rule = ComparisonRule::Numeric { tolerance: 0.05 };
        assert!(rule.equal("1.1V", "1.12 V"));
        assert!(rule.equal("n/a", "N/A"));
        assert!(!rule.equal("n/a", "1.1"));
        assert_eq!(leading_number("5600 MT/s"), Some(5600.0));
        assert_eq!(leading_number("CL46"), None);
    }
}
