//! End-to-end lookup: resolve, walk the chain, validate, persist
//!
//! `Pipeline` is cheap to clone and safe to use from concurrent tasks;
//! lookups for different canonical ids run independently, and writes for
//! the same id are serialized by the catalog writer.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheNamespace, FingerprintCache};
use crate::catalog::{CatalogStore, CatalogWriter, PersistReport, SqliteCatalog};
use crate::chain::{ChainOutcome, ChainReport, ChainSettings, FetchAttempt, SourceChainManager};
use crate::collaborators::{BasicNormalizer, Classifier, ParserRegistry};
use crate::db::{init_database_pool, DATABASE_FILE};
use crate::error::{EngineError, EngineResult};
use crate::fetch::blocklist::BlockedDomainSet;
use crate::fetch::browser::{BrowserFetcher, SessionPool, WebDriverBackend};
use crate::fetch::http::HttpFetcher;
use crate::fetch::FetchEngine;
use crate::resolver::{CatalogResolver, Resolution};
use crate::types::{CanonicalEntry, ComponentCategory, ResolveCandidate, SpecField};
use crate::validator::{ConsensusResult, CrossValidator, KeyConsensus};
use hwx_common::config::{ChainMode, TomlConfig};
use hwx_common::events::EventBus;

/// Result of a lookup
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupOutcome {
    /// Spec fields for the entry
    Specs {
        entry: CanonicalEntry,
        fields: Vec<SpecField>,
        /// Served from the spec cache without a chain walk
        from_cache: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<ChainReport>,
        #[serde(skip_serializing_if = "Option::is_none")]
        consensus: Option<ConsensusResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        persisted: Option<PersistReport>,
    },
    /// Ambiguous identifier; call [`Pipeline::lookup_candidate`] with a choice
    NeedsSelection { candidates: Vec<ResolveCandidate> },
    /// Nothing in the catalog matches
    Unresolved {
        category: ComponentCategory,
        input: String,
    },
    /// Every source was tried without data
    Exhausted {
        entry: CanonicalEntry,
        attempts: Vec<FetchAttempt>,
    },
    /// Caller cancelled the chain walk; nothing was persisted
    Cancelled { entry: CanonicalEntry },
}

#[derive(Clone)]
pub struct Pipeline {
    resolver: CatalogResolver,
    classifier: Option<Arc<dyn Classifier>>,
    manager: SourceChainManager,
    validator: CrossValidator,
    writer: CatalogWriter,
    catalog: SqliteCatalog,
    cache: FingerprintCache,
    default_mode: ChainMode,
}

/// Production pipeline plus the browser pool to shut down on exit
pub struct OpenedPipeline {
    pub pipeline: Pipeline,
    pub browser_pool: Arc<SessionPool>,
    pub events: EventBus,
}

impl Pipeline {
    pub fn new(
        catalog: SqliteCatalog,
        cache: FingerprintCache,
        manager: SourceChainManager,
        validator: CrossValidator,
        default_mode: ChainMode,
    ) -> Self {
        let resolver = CatalogResolver::new(Arc::new(catalog.clone()), Arc::new(BasicNormalizer))
            .with_cache(cache.clone());
        Self {
            resolver,
            classifier: None,
            manager,
            validator,
            writer: CatalogWriter::new(catalog.clone()),
            catalog,
            cache,
            default_mode,
        }
    }

    pub fn with_resolver(mut self, resolver: CatalogResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Wire the production stack from configuration
    ///
    /// Opens (or creates) the database under `root_folder`.
    pub async fn open(config: &TomlConfig, root_folder: &Path) -> EngineResult<OpenedPipeline> {
        let pool = init_database_pool(&root_folder.join(DATABASE_FILE)).await?;
        let catalog = SqliteCatalog::new(pool.clone());
        let cache = FingerprintCache::new(pool, config.cache.ttl_seconds);

        let engine_config = &config.engine;
        let timeout = std::time::Duration::from_millis(engine_config.fetch_timeout_ms);
        let light = Arc::new(HttpFetcher::new(&engine_config.user_agent, timeout)?);
        let browser_pool = SessionPool::new(
            Arc::new(WebDriverBackend::new(&config.browser)?),
            config.browser.max_sessions,
        );
        let heavy = Arc::new(BrowserFetcher::new(browser_pool.clone()));

        let events = EventBus::default();
        let engine = FetchEngine::new(light, heavy, BlockedDomainSet::new(), engine_config);
        let manager = SourceChainManager::new(
            engine,
            ParserRegistry::with_defaults(),
            events.clone(),
            ChainSettings::from(engine_config),
        );

        let pipeline = Self::new(
            catalog,
            cache,
            manager,
            CrossValidator::new(engine_config),
            engine_config.chain_mode,
        );

        Ok(OpenedPipeline {
            pipeline,
            browser_pool,
            events,
        })
    }

    pub fn catalog(&self) -> &SqliteCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub fn resolver(&self) -> &CatalogResolver {
        &self.resolver
    }

    pub fn manager(&self) -> &SourceChainManager {
        &self.manager
    }

    /// Resolve an identifier and retrieve specs for an unambiguous match
    ///
    /// Without a category the classifier decides; without a classifier the
    /// call fails.
    pub async fn lookup(
        &self,
        raw: &str,
        category: Option<ComponentCategory>,
        mode: Option<ChainMode>,
        cancel: &CancellationToken,
    ) -> EngineResult<LookupOutcome> {
        let category = match category {
            Some(category) => category,
            None => {
                let classifier = self.classifier.as_ref().ok_or_else(|| {
                    EngineError::Config("no category given and no classifier configured".to_string())
                })?;
                let normalized = self.resolver.normalizer().normalize(raw);
                let (category, confidence) = classifier.classify(&normalized);
                tracing::debug!(category = %category, confidence, "Category classified");
                category
            }
        };

        match self.resolver.resolve(raw, category).await? {
            Resolution::Exact(candidate) => self.lookup_candidate(&candidate, mode, cancel).await,
            Resolution::Candidates(candidates) => Ok(LookupOutcome::NeedsSelection { candidates }),
            Resolution::NoMatch => Ok(LookupOutcome::Unresolved {
                category,
                input: raw.to_string(),
            }),
        }
    }

    /// Retrieve specs for a chosen candidate
    pub async fn lookup_candidate(
        &self,
        candidate: &ResolveCandidate,
        mode: Option<ChainMode>,
        cancel: &CancellationToken,
    ) -> EngineResult<LookupOutcome> {
        let mode = mode.unwrap_or(self.default_mode);
        let entry = &candidate.entry;

        if mode == ChainMode::FirstSuccess {
            if let Some(fields) = self
                .cache
                .get::<Vec<SpecField>>(CacheNamespace::Specs, &entry.id)
                .await?
            {
                tracing::debug!(id = %entry.id, "Spec cache hit");
                return Ok(LookupOutcome::Specs {
                    entry: entry.clone(),
                    fields,
                    from_cache: true,
                    report: None,
                    consensus: None,
                    persisted: None,
                });
            }
        }

        let report = match self.manager.run(entry.category, entry, mode, cancel).await? {
            ChainOutcome::Completed(report) => report,
            ChainOutcome::Exhausted { attempts, .. } => {
                return Ok(LookupOutcome::Exhausted {
                    entry: entry.clone(),
                    attempts,
                })
            }
            ChainOutcome::Cancelled { .. } => {
                return Ok(LookupOutcome::Cancelled {
                    entry: entry.clone(),
                })
            }
        };

        match mode {
            ChainMode::FirstSuccess => {
                let fields = report.fields().to_vec();
                self.cache.set(CacheNamespace::Specs, &entry.id, &fields).await?;
                Ok(LookupOutcome::Specs {
                    entry: entry.clone(),
                    fields,
                    from_cache: false,
                    report: Some(report),
                    consensus: None,
                    persisted: None,
                })
            }
            ChainMode::Exhaustive => {
                let consensus = self.validator.validate(&report.observations());
                let fields = consensus_fields(&report, &consensus);

                // A cancellation that lands after the walk still must not persist
                if cancel.is_cancelled() {
                    return Ok(LookupOutcome::Cancelled {
                        entry: entry.clone(),
                    });
                }

                let persisted = self.writer.persist(entry, &consensus).await?;
                if persisted.is_some() {
                    self.cache.invalidate(CacheNamespace::Specs, &entry.id).await?;
                }
                let entry = match persisted {
                    Some(_) => self.catalog.get(&entry.id).await?.unwrap_or_else(|| entry.clone()),
                    None => entry.clone(),
                };

                Ok(LookupOutcome::Specs {
                    entry,
                    fields,
                    from_cache: false,
                    report: Some(report),
                    consensus: Some(consensus),
                    persisted,
                })
            }
        }
    }
}

/// One field per key: the lead agreeing field with consensus confidence,
/// the single reporter's field, or UNKNOWN when sources disagree
fn consensus_fields(report: &ChainReport, consensus: &ConsensusResult) -> Vec<SpecField> {
    let find = |source: &str, key: &str| {
        report
            .results
            .iter()
            .find(|r| r.source_id == source)
            .and_then(|r| r.fields.iter().find(|f| f.key() == key))
            .cloned()
    };

    consensus
        .keys
        .iter()
        .map(|(key, outcome)| match outcome {
            KeyConsensus::Agreed {
                sources, confidence, ..
            } => sources
                .first()
                .and_then(|lead| find(lead, key))
                .map(|field| field.with_confidence(*confidence))
                .unwrap_or_else(|| SpecField::unknown(key.clone())),
            KeyConsensus::SingleSource { source, .. } => {
                find(source, key).unwrap_or_else(|| SpecField::unknown(key.clone()))
            }
            KeyConsensus::NoConsensus { .. } => SpecField::unknown(key.clone()),
        })
        .collect()
}
