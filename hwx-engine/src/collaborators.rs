//! Seams for collaborators that live outside the core
//!
//! The core never guesses a category, never parses site-specific page
//! structure, and treats input normalization as a precondition. Hosts plug
//! those pieces in through the traits below.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{ComponentCategory, RawFields};

/// Input normalizer: must be idempotent and deterministic
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> String;
}

/// Category classifier for raw input
pub trait Classifier: Send + Sync {
    /// Returns the guessed category and a confidence in [0, 1]
    fn classify(&self, normalized: &str) -> (ComponentCategory, f64);
}

/// Turns fetched page content into raw key/value pairs
///
/// Parsers attach no provenance; the chain manager does that.
pub trait PageParser: Send + Sync {
    fn parse(&self, content: &str, locator: &str) -> RawFields;
}

/// Default normalizer: lower case, punctuation to spaces, whitespace collapsed
///
/// `-`, `.`, `/` and `+` are kept because they are significant inside part
/// numbers and model names ("i7-12700k", "1.1v", "pcie 4.0").
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicNormalizer;

impl Normalizer for BasicNormalizer {
    fn normalize(&self, raw: &str) -> String {
        raw.chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '.' | '/' | '+') {
                    c.to_lowercase().next().unwrap_or(c)
                } else {
                    ' '
                }
            })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Page parsers keyed by parser id (the `parser` field of a source)
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn PageParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the generic spec-table parser under `spec_table`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            crate::spec_table::SPEC_TABLE_PARSER,
            Arc::new(crate::spec_table::SpecTableParser::default()),
        );
        registry
    }

    pub fn register(&mut self, id: impl Into<String>, parser: Arc<dyn PageParser>) {
        self.parsers.insert(id.into(), parser);
    }

    /// Parser for an id, falling back to `spec_table` when registered
    pub fn get(&self, id: &str) -> Option<Arc<dyn PageParser>> {
        self.parsers
            .get(id)
            .or_else(|| self.parsers.get(crate::spec_table::SPEC_TABLE_PARSER))
            .cloned()
    }
}
