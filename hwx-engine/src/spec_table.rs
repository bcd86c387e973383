//! Generic spec-table parser
//!
//! Fallback used when no site-specific parser is registered for a source.
//! Extracts label/value pairs from two-cell table rows and definition
//! lists, which is how most manufacturer spec pages lay out their data.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::collaborators::PageParser;
use crate::types::RawFields;

/// Parser id under which this parser is registered
pub const SPEC_TABLE_PARSER: &str = "spec_table";

static ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("valid row regex"));

static CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<t[hd][^>]*>(.*?)</t[hd]>").expect("valid cell regex"));

static DEF_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<dt[^>]*>(.*?)</dt>\s*<dd[^>]*>(.*?)</dd>").expect("valid dl regex")
});

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid tag regex"));

/// Label/value table parser
#[derive(Debug, Clone)]
pub struct SpecTableParser {
    /// Prefix added to every key ("ram." gives "ram.cas_latency")
    key_prefix: String,
}

impl Default for SpecTableParser {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
        }
    }
}

impl SpecTableParser {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: prefix.into(),
        }
    }

    fn insert(&self, fields: &mut RawFields, label: &str, value: &str) {
        let key = label_to_key(&clean_text(label));
        let value = clean_text(value);
        if key.is_empty() || value.is_empty() {
            return;
        }
        // First occurrence wins; later duplicates are usually footnotes
        fields
            .entry(format!("{}{}", self.key_prefix, key))
            .or_insert(value);
    }
}

impl PageParser for SpecTableParser {
    fn parse(&self, content: &str, _locator: &str) -> RawFields {
        let mut fields = RawFields::new();

        for row in ROW.captures_iter(content) {
            let cells: Vec<_> = CELL.captures_iter(&row[1]).collect();
            if let [label, value] = cells.as_slice() {
                self.insert(&mut fields, &label[1], &value[1]);
            }
        }
        for caps in DEF_PAIR.captures_iter(content) {
            self.insert(&mut fields, &caps[1], &caps[2]);
        }

        fields
    }
}

/// Strip tags, decode the common entities, collapse whitespace
fn clean_text(html: &str) -> String {
    let text = TAG.replace_all(html, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// "Base Frequency (GHz):" -> "base_frequency_ghz"
fn label_to_key(label: &str) -> String {
    label
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
