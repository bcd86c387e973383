//! Core types shared by the resolver, source chains and the cross-validator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Raw key/value pairs produced by a page parser, before provenance is attached
pub type RawFields = BTreeMap<String, String>;

// ============================================================================
// Enumerations
// ============================================================================

/// Hardware component category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentCategory {
    Cpu,
    Ram,
    Gpu,
    Mainboard,
    Disk,
    General,
}

impl ComponentCategory {
    pub const ALL: [ComponentCategory; 6] = [
        Self::Cpu,
        Self::Ram,
        Self::Gpu,
        Self::Mainboard,
        Self::Disk,
        Self::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Ram => "RAM",
            Self::Gpu => "GPU",
            Self::Mainboard => "MAINBOARD",
            Self::Disk => "DISK",
            Self::General => "GENERAL",
        }
    }
}

impl fmt::Display for ComponentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComponentCategory {
    type Err = hwx_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| hwx_common::Error::UnknownValue {
                kind: "category",
                value: s.to_string(),
            })
    }
}

/// Precedence class of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceTier {
    /// Manufacturer-grade data
    Official,
    /// Reputable secondary database
    Reference,
    /// Locally embedded catalog
    Embedded,
}

impl SourceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Official => "OFFICIAL",
            Self::Reference => "REFERENCE",
            Self::Embedded => "EMBEDDED",
        }
    }

    /// Status given to a value extracted from a source of this tier
    pub fn extracted_status(self) -> SpecStatus {
        match self {
            Self::Official => SpecStatus::ExtractedOfficial,
            Self::Reference | Self::Embedded => SpecStatus::ExtractedReference,
        }
    }

    /// Baseline confidence for a single-source value of this tier
    pub fn base_confidence(self) -> f64 {
        match self {
            Self::Official => 0.95,
            Self::Reference => 0.85,
            Self::Embedded => 0.80,
        }
    }
}

/// Status of a specification value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpecStatus {
    ExtractedOfficial,
    ExtractedReference,
    Calculated,
    Unknown,
    NotApplicable,
}

impl SpecStatus {
    /// Whether this status claims a sourced value
    pub fn requires_provenance(self) -> bool {
        !matches!(self, Self::Unknown | Self::NotApplicable)
    }
}

// ============================================================================
// SpecField
// ============================================================================

/// SpecField construction error
#[derive(Debug, Error, PartialEq)]
pub enum SpecFieldError {
    #[error("spec field '{0}' has an empty key")]
    EmptyKey(String),

    #[error("spec field '{key}' with status {status:?} needs a source locator and tier")]
    MissingProvenance { key: String, status: SpecStatus },

    #[error("spec field '{key}' confidence {confidence} outside [0, 1]")]
    ConfidenceOutOfRange { key: String, confidence: f64 },
}

/// One normalized specification value with provenance
///
/// Fields are private so the provenance invariant holds for every instance:
/// a sourced status always carries a tier and a non-empty locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecField {
    key: String,
    value: String,
    unit: Option<String>,
    status: SpecStatus,
    tier: Option<SourceTier>,
    source_id: Option<String>,
    source_locator: Option<String>,
    confidence: f64,
}

impl SpecField {
    /// Value extracted from a source
    pub fn sourced(
        key: impl Into<String>,
        value: impl Into<String>,
        status: SpecStatus,
        tier: SourceTier,
        source_id: impl Into<String>,
        source_locator: impl Into<String>,
        confidence: f64,
    ) -> Result<Self, SpecFieldError> {
        let key = key.into();
        let source_locator = source_locator.into();

        if key.trim().is_empty() {
            return Err(SpecFieldError::EmptyKey(key));
        }
        if status.requires_provenance() && source_locator.trim().is_empty() {
            return Err(SpecFieldError::MissingProvenance { key, status });
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(SpecFieldError::ConfidenceOutOfRange { key, confidence });
        }

        let value = value.into();
        let (value, unit) = split_unit(&value);

        Ok(Self {
            key,
            value,
            unit,
            status,
            tier: Some(tier),
            source_id: Some(source_id.into()),
            source_locator: Some(source_locator),
            confidence,
        })
    }

    /// Placeholder for a key no source confirmed
    pub fn unknown(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: "UNKNOWN".to_string(),
            unit: None,
            status: SpecStatus::Unknown,
            tier: None,
            source_id: None,
            source_locator: None,
            confidence: 0.0,
        }
    }

    /// Same field with a different confidence, clamped to [0, 1]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Value with its unit re-attached, as observed on the source page
    pub fn display_value(&self) -> String {
        match &self.unit {
            Some(unit) => format!("{}{}", self.value, unit),
            None => self.value.clone(),
        }
    }

    pub fn status(&self) -> SpecStatus {
        self.status
    }

    pub fn tier(&self) -> Option<SourceTier> {
        self.tier
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn source_locator(&self) -> Option<&str> {
        self.source_locator.as_deref()
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Split a trailing alphabetic unit from a numeric value ("1.1V" -> ("1.1", "V"))
///
/// Values that do not start with a number ("CL46", "DDR5") are left whole.
fn split_unit(raw: &str) -> (String, Option<String>) {
    let trimmed = raw.trim();
    let numeric_end = trimmed
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
        .last()
        .map(|(i, c)| i + c.len_utf8());

    match numeric_end {
        Some(end) if end < trimmed.len() => {
            let unit = trimmed[end..].trim();
            if !unit.is_empty() && unit.chars().all(|c| c.is_alphabetic() || c == '/') {
                (trimmed[..end].to_string(), Some(unit.to_string()))
            } else {
                (trimmed.to_string(), None)
            }
        }
        _ => (trimmed.to_string(), None),
    }
}

// ============================================================================
// Catalog entries
// ============================================================================

/// Spec value stored on a catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSpec {
    pub value: String,
    #[serde(default)]
    pub unit: Option<String>,
    /// Sources that agreed on this value
    #[serde(default)]
    pub sources: Vec<String>,
    pub confidence: f64,
    /// Reached multi-source consensus
    #[serde(default)]
    pub validated: bool,
}

/// Provenance of a catalog entry's validated data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub validation_sources: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub confidence: f64,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            validation_sources: Vec::new(),
            last_updated: Utc::now(),
            confidence: 0.0,
        }
    }
}

/// Catalog-resident canonical component record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntry {
    pub id: String,
    pub category: ComponentCategory,
    pub brand: String,
    pub model: String,
    #[serde(default)]
    pub part_number: Option<String>,
    #[serde(default)]
    pub ean: Option<String>,
    /// Known product pages keyed by source id
    #[serde(default)]
    pub locators: BTreeMap<String, String>,
    #[serde(default)]
    pub specs: BTreeMap<String, StoredSpec>,
    #[serde(default)]
    pub validated: bool,
    #[serde(default)]
    pub provenance: Provenance,
    /// Catalog insertion order, assigned by the store
    #[serde(default)]
    pub seq: i64,
}

impl CanonicalEntry {
    pub fn new(
        category: ComponentCategory,
        brand: impl Into<String>,
        model: impl Into<String>,
        part_number: Option<String>,
    ) -> Self {
        let brand = brand.into();
        let model = model.into();
        Self {
            id: canonical_id(category, &brand, &model),
            category,
            brand,
            model,
            part_number,
            ean: None,
            locators: BTreeMap::new(),
            specs: BTreeMap::new(),
            validated: false,
            provenance: Provenance::default(),
            seq: 0,
        }
    }

    pub fn with_locator(mut self, source_id: impl Into<String>, url: impl Into<String>) -> Self {
        self.locators.insert(source_id.into(), url.into());
        self
    }

    /// Keys that reached multi-source consensus
    pub fn validated_specs(&self) -> impl Iterator<Item = (&String, &StoredSpec)> {
        self.specs.iter().filter(|(_, spec)| spec.validated)
    }

    /// "Brand Model" for logs and display
    pub fn display_name(&self) -> String {
        format!("{} {}", self.brand, self.model)
    }
}

/// Stable canonical id: `category:brand:model`, lower case, spaces as dashes
pub fn canonical_id(category: ComponentCategory, brand: &str, model: &str) -> String {
    let slug = |s: &str| {
        s.split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .to_lowercase()
    };
    format!("{}:{}:{}", category.as_str().to_lowercase(), slug(brand), slug(model))
}

// ============================================================================
// Resolution
// ============================================================================

/// Rule that produced a candidate's score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Url,
    ExactPartNumber,
    ExactModel,
    FuzzyModel,
    FuzzyPartNumber,
    BrandTokens,
}

/// Scored match between a raw identifier and a catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveCandidate {
    pub entry: CanonicalEntry,
    pub score: f64,
    pub strategy: MatchStrategy,
    /// URL the identifier pointed at, for URL resolution
    #[serde(default)]
    pub source_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_case_insensitive() {
        assert_eq!("ram".parse::<ComponentCategory>().unwrap(), ComponentCategory::Ram);
        assert_eq!(" MainBoard ".parse::<ComponentCategory>().unwrap(), ComponentCategory::Mainboard);
        assert!("psu".parse::<ComponentCategory>().is_err());
    }

    #[test]
    fn test_sourced_field_requires_locator() {
        let err = SpecField::sourced(
            "ram.voltage_v",
            "1.1V",
            SpecStatus::ExtractedOfficial,
            SourceTier::Official,
            "crucial",
            "  ",
            0.9,
        )
        .unwrap_err();
        assert!(matches!(err, SpecFieldError::MissingProvenance { .. }));
    }

    #[test]
    fn test_sourced_field_splits_unit() {
        let field = SpecField::sourced(
            "ram.voltage_v",
            "1.1V",
            SpecStatus::ExtractedOfficial,
            SourceTier::Official,
            "crucial",
            "https://www.crucial.com/memory/ddr5/ct2k16g56c46u5",
            0.9,
        )
        .unwrap();
        assert_eq!(field.value(), "1.1");
        assert_eq!(field.unit(), Some("V"));
        assert_eq!(field.display_value(), "1.1V");
    }

    #[test]
    fn test_split_unit_keeps_prefixed_values() {
        assert_eq!(split_unit("CL46"), ("CL46".to_string(), None));
        assert_eq!(split_unit("5600 MT/s"), ("5600".to_string(), Some("MT/s".to_string())));
        assert_eq!(split_unit("16"), ("16".to_string(), None));
        assert_eq!(split_unit("2x16GB kit"), ("2x16GB kit".to_string(), None));
    }

    #[test]
    fn test_unknown_field_has_no_provenance() {
        let field = SpecField::unknown("gpu.vram_gb");
        assert_eq!(field.status(), SpecStatus::Unknown);
        assert!(field.source_locator().is_none());
        assert!(field.tier().is_none());
    }

    #[test]
    fn test_canonical_id_slug() {
        assert_eq!(
            canonical_id(ComponentCategory::Ram, "Crucial", "Pro DDR5 32GB Kit"),
            "ram:crucial:pro-ddr5-32gb-kit"
        );
    }
}
