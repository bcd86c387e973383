//! Data sources and per-category source chains

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::form_urlencoded;

use crate::allowlist::{domain_matches, host_of};
use crate::error::{EngineError, EngineResult};
use crate::fetch::FetchStrategy;
use crate::types::{CanonicalEntry, ComponentCategory, SourceTier};

/// How a source finds the page for an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "template", rename_all = "snake_case")]
pub enum LocatorTemplate {
    /// A locator recorded on the entry for this source, or any entry
    /// locator on a domain the source serves
    KnownUrl,
    /// URL with `{brand}`, `{model}` and `{part_number}` placeholders
    Search(String),
    /// Local catalog; no fetch
    Embedded,
}

/// One data source in a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub category: ComponentCategory,
    pub tier: SourceTier,
    /// Preferred fetch strategy; heavyweight sources never try plain HTTP
    pub strategy: FetchStrategy,
    /// Lower runs first
    pub priority: u32,
    /// Domains this source serves
    pub domains: Vec<String>,
    pub locator: LocatorTemplate,
    /// Page parser id in the parser registry
    pub parser: String,
}

impl Source {
    pub fn new(
        id: &str,
        category: ComponentCategory,
        tier: SourceTier,
        priority: u32,
        domains: &[&str],
    ) -> Self {
        Self {
            id: id.to_string(),
            category,
            tier,
            strategy: FetchStrategy::Lightweight,
            priority,
            domains: domains.iter().map(|d| d.to_string()).collect(),
            locator: LocatorTemplate::KnownUrl,
            parser: id.to_string(),
        }
    }

    /// Embedded catalog source
    pub fn embedded(id: &str, category: ComponentCategory, priority: u32) -> Self {
        Self {
            strategy: FetchStrategy::Lightweight,
            locator: LocatorTemplate::Embedded,
            ..Self::new(id, category, SourceTier::Embedded, priority, &[])
        }
    }

    pub fn heavyweight(mut self) -> Self {
        self.strategy = FetchStrategy::Heavyweight;
        self
    }

    pub fn search(mut self, template: &str) -> Self {
        self.locator = LocatorTemplate::Search(template.to_string());
        self
    }

    pub fn is_embedded(&self) -> bool {
        self.tier == SourceTier::Embedded
    }

    /// Whether this source serves the host of `url`
    pub fn serves(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.domains.iter().any(|d| domain_matches(&host, d)))
    }

    /// Target URL for an entry, `None` when the source cannot locate it
    pub fn locator_for(&self, entry: &CanonicalEntry) -> Option<String> {
        match &self.locator {
            LocatorTemplate::Embedded => None,
            LocatorTemplate::KnownUrl => entry
                .locators
                .get(&self.id)
                .cloned()
                .or_else(|| entry.locators.values().find(|url| self.serves(url)).cloned()),
            LocatorTemplate::Search(template) => {
                if template.contains("{part_number}") && entry.part_number.is_none() {
                    return None;
                }
                let encode = |s: &str| form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
                Some(
                    template
                        .replace("{brand}", &encode(&entry.brand))
                        .replace("{model}", &encode(&entry.model))
                        .replace("{part_number}", &encode(entry.part_number.as_deref().unwrap_or_default())),
                )
            }
        }
    }
}

/// Ordered sources for one category
#[derive(Debug, Clone, PartialEq)]
pub struct SourceChain {
    category: ComponentCategory,
    sources: Vec<Source>,
}

impl SourceChain {
    /// Validate and order a chain
    ///
    /// Fails on duplicate ids or priorities, sources of another category,
    /// or an embedded source that is not last.
    pub fn new(category: ComponentCategory, mut sources: Vec<Source>) -> EngineResult<Self> {
        sources.sort_by_key(|s| s.priority);

        let mut ids = HashSet::new();
        for (i, source) in sources.iter().enumerate() {
            if source.category != category {
                return Err(EngineError::Config(format!(
                    "source '{}' is {} but the chain is {}",
                    source.id, source.category, category
                )));
            }
            if !ids.insert(source.id.as_str()) {
                return Err(EngineError::Config(format!("duplicate source id '{}'", source.id)));
            }
            if i > 0 && sources[i - 1].priority == source.priority {
                return Err(EngineError::Config(format!(
                    "sources '{}' and '{}' share priority {}",
                    sources[i - 1].id, source.id, source.priority
                )));
            }
            if source.is_embedded() && i + 1 != sources.len() {
                return Err(EngineError::Config(format!(
                    "embedded source '{}' must be last in the {} chain",
                    source.id, category
                )));
            }
        }

        Ok(Self { category, sources })
    }

    pub fn category(&self) -> ComponentCategory {
        self.category
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Built-in chain for a category
    pub fn default_for(category: ComponentCategory) -> Self {
        use ComponentCategory::*;
        use SourceTier::{Official, Reference};

        let sources = match category {
            Cpu => vec![
                Source::new("intel_ark", Cpu, Official, 1, &["intel.com"]),
                Source::new("amd_specs", Cpu, Official, 2, &["amd.com"]),
                Source::new("wikichip", Cpu, Reference, 3, &["wikichip.org"])
                    .search("https://en.wikichip.org/w/index.php?search={brand}+{model}"),
                Source::new("techpowerup_cpu", Cpu, Reference, 4, &["techpowerup.com"])
                    .search("https://www.techpowerup.com/cpu-specs/?ajaxsrch={model}"),
                Source::embedded("embedded_cpu", Cpu, 99),
            ],
            Ram => vec![
                Source::new("crucial", Ram, Official, 1, &["crucial.com", "micron.com"]),
                Source::new("kingston", Ram, Official, 2, &["kingston.com"]),
                Source::new("corsair", Ram, Official, 3, &["corsair.com"]).heavyweight(),
                Source::new("gskill", Ram, Official, 4, &["gskill.com"]).heavyweight(),
                Source::new("techpowerup_ram", Ram, Reference, 5, &["techpowerup.com"]),
                Source::embedded("embedded_ram", Ram, 99),
            ],
            Gpu => vec![
                Source::new("techpowerup_gpu", Gpu, Reference, 1, &["techpowerup.com"])
                    .search("https://www.techpowerup.com/gpu-specs/?ajaxsrch={model}"),
                Source::new("nvidia_official", Gpu, Official, 2, &["nvidia.com"]),
                Source::new("amd_gpu", Gpu, Official, 3, &["amd.com"]),
                Source::new("intel_arc", Gpu, Official, 4, &["intel.com"]),
                Source::new("asus_gpu", Gpu, Official, 5, &["asus.com"]),
                Source::embedded("embedded_gpu", Gpu, 99),
            ],
            Mainboard => vec![
                Source::new("asus_mb", Mainboard, Official, 1, &["asus.com"]),
                Source::new("msi_mb", Mainboard, Official, 2, &["msi.com"]),
                Source::new("gigabyte_mb", Mainboard, Official, 3, &["gigabyte.com"]),
                Source::new("asrock_mb", Mainboard, Official, 4, &["asrock.com"]),
                Source::embedded("embedded_mb", Mainboard, 99),
            ],
            Disk => vec![
                Source::new("samsung_storage", Disk, Official, 1, &["samsung.com"]),
                Source::new("wdc_storage", Disk, Official, 2, &["wdc.com", "westerndigital.com"]),
                Source::new("seagate_storage", Disk, Official, 3, &["seagate.com"]),
                Source::new("techpowerup_ssd", Disk, Reference, 4, &["techpowerup.com"])
                    .search("https://www.techpowerup.com/ssd-specs/?q={model}"),
                Source::embedded("embedded_disk", Disk, 99),
            ],
            General => vec![Source::embedded("embedded_general", General, 99)],
        };

        Self { category, sources }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chains_are_valid() {
        for category in ComponentCategory::ALL {
            let chain = SourceChain::default_for(category);
            let rebuilt = SourceChain::new(category, chain.sources().to_vec()).unwrap();
            assert_eq!(rebuilt, chain);
            assert!(chain.sources().last().unwrap().is_embedded());
        }
    }

    #[test]
    fn test_duplicate_priority_rejected() {
        let err = SourceChain::new(
            ComponentCategory::Ram,
            vec![
                Source::new("a", ComponentCategory::Ram, SourceTier::Official, 1, &["crucial.com"]),
                Source::new("b", ComponentCategory::Ram, SourceTier::Official, 1, &["kingston.com"]),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("share priority"));
    }

    #[test]
    fn test_embedded_must_be_last() {
        let err = SourceChain::new(
            ComponentCategory::Ram,
            vec![
                Source::embedded("embedded_ram", ComponentCategory::Ram, 1),
                Source::new("a", ComponentCategory::Ram, SourceTier::Official, 2, &["crucial.com"]),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be last"));
    }

    #[test]
    fn test_locator_for() {
        let entry = CanonicalEntry::new(ComponentCategory::Ram, "Crucial", "Pro DDR5 32GB", Some("CT2K16G56C46U5".into()))
            .with_locator("user_url", "https://www.micron.com/products/ct2k16g56c46u5");

        let crucial = Source::new("crucial", ComponentCategory::Ram, SourceTier::Official, 1, &["crucial.com", "micron.com"]);
        assert_eq!(
            crucial.locator_for(&entry).as_deref(),
            Some("https://www.micron.com/products/ct2k16g56c46u5")
        );

        let kingston = Source::new("kingston", ComponentCategory::Ram, SourceTier::Official, 2, &["kingston.com"]);
        assert_eq!(kingston.locator_for(&entry), None);

        let search = Source::new("tpu", ComponentCategory::Ram, SourceTier::Reference, 3, &["techpowerup.com"])
            .search("https://www.techpowerup.com/?q={brand}+{model}");
        assert_eq!(
            search.locator_for(&entry).as_deref(),
            Some("https://www.techpowerup.com/?q=Crucial+Pro+DDR5+32GB")
        );
    }
}
