//! Source chain manager
//!
//! Walks a category's chain for one catalog entry, fetching and parsing
//! each source in priority order and reporting progress as [`ChainEvent`]s.
//! Per-source failures are recorded and the walk moves on; only running out
//! of sources ends a walk without data.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::sources::{Source, SourceChain};
use crate::allowlist::host_of;
use crate::collaborators::ParserRegistry;
use crate::error::{EngineError, EngineResult};
use crate::fetch::detector::Severity;
use crate::fetch::{FetchEngine, FetchOutcome, FetchStrategy, Page, TransportErrorKind};
use crate::types::{CanonicalEntry, ComponentCategory, SourceTier, SpecField};
use crate::validator::SourceObservation;
use hwx_common::config::{ChainMode, EngineConfig};
use hwx_common::events::{ChainEvent, EventBus};

/// Chain-walk options taken from the engine configuration
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub enable_secondary_tier: bool,
    pub max_retries_per_source: u32,
}

impl From<&EngineConfig> for ChainSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            enable_secondary_tier: config.enable_secondary_tier,
            max_retries_per_source: config.max_retries_per_source,
        }
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// What happened at one source
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded { fields: usize },
    Empty,
    Blocked { reason: String, severity: Severity },
    Errored { error: TransportErrorKind },
}

/// Record of one source visit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchAttempt {
    pub source_id: String,
    pub target: String,
    pub outcome: AttemptOutcome,
    /// `None` for the embedded catalog
    pub strategy: Option<FetchStrategy>,
    pub elapsed_ms: u64,
    /// Retries after transport errors
    pub retries: u32,
}

/// Fields one source produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceResult {
    pub source_id: String,
    pub priority: u32,
    pub tier: SourceTier,
    pub locator: String,
    pub fields: Vec<SpecField>,
}

impl SourceResult {
    pub fn observation(&self) -> SourceObservation {
        SourceObservation {
            source_id: self.source_id.clone(),
            priority: self.priority,
            tier: self.tier,
            fields: self.fields.clone(),
        }
    }
}

/// Everything a walk produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainReport {
    pub run_id: Uuid,
    pub canonical_id: String,
    pub mode: ChainMode,
    pub attempts: Vec<FetchAttempt>,
    /// Sources that yielded fields, in priority order
    pub results: Vec<SourceResult>,
}

impl ChainReport {
    fn new(run_id: Uuid, canonical_id: &str, mode: ChainMode) -> Self {
        Self {
            run_id,
            canonical_id: canonical_id.to_string(),
            mode,
            attempts: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Source whose fields a first-success walk returns
    pub fn terminal_source(&self) -> Option<&str> {
        self.results.first().map(|r| r.source_id.as_str())
    }

    /// Fields of the best-priority successful source
    pub fn fields(&self) -> &[SpecField] {
        self.results.first().map(|r| r.fields.as_slice()).unwrap_or_default()
    }

    pub fn observations(&self) -> Vec<SourceObservation> {
        self.results.iter().map(SourceResult::observation).collect()
    }
}

/// Terminal state of a walk
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChainOutcome {
    /// At least one source yielded fields
    Completed(ChainReport),
    /// Every eligible source was tried without data
    Exhausted {
        run_id: Uuid,
        attempts: Vec<FetchAttempt>,
    },
    /// Cancelled by the caller; `partial` holds what finished before
    Cancelled { partial: ChainReport },
}

/// Result of visiting one source
enum Visit {
    Yielded(SourceResult),
    Nothing,
    Cancelled,
}

#[derive(Clone)]
pub struct SourceChainManager {
    chains: Arc<BTreeMap<ComponentCategory, SourceChain>>,
    engine: FetchEngine,
    parsers: ParserRegistry,
    events: EventBus,
    settings: ChainSettings,
}

impl SourceChainManager {
    /// Manager with the built-in chain for every category
    pub fn new(
        engine: FetchEngine,
        parsers: ParserRegistry,
        events: EventBus,
        settings: ChainSettings,
    ) -> Self {
        let chains = ComponentCategory::ALL
            .into_iter()
            .map(|category| (category, SourceChain::default_for(category)))
            .collect();
        Self {
            chains: Arc::new(chains),
            engine,
            parsers,
            events,
            settings,
        }
    }

    /// Replace the chain of one category
    pub fn with_chain(mut self, chain: SourceChain) -> Self {
        Arc::make_mut(&mut self.chains).insert(chain.category(), chain);
        self
    }

    pub fn chain(&self, category: ComponentCategory) -> Option<&SourceChain> {
        self.chains.get(&category)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn engine(&self) -> &FetchEngine {
        &self.engine
    }

    /// Walk the category's chain for `entry`
    pub async fn run(
        &self,
        category: ComponentCategory,
        entry: &CanonicalEntry,
        mode: ChainMode,
        cancel: &CancellationToken,
    ) -> EngineResult<ChainOutcome> {
        let chain = self
            .chains
            .get(&category)
            .ok_or_else(|| EngineError::Config(format!("no source chain for {}", category)))?;

        let run_id = Uuid::new_v4();
        tracing::info!(
            run_id = %run_id,
            category = %category,
            entry = %entry.id,
            mode = ?mode,
            "Source chain started"
        );
        self.events.emit_lossy(ChainEvent::ChainStarted {
            run_id,
            category: category.to_string(),
            canonical_id: entry.id.clone(),
            sources: chain.len(),
            timestamp: Utc::now(),
        });

        let mut report = ChainReport::new(run_id, &entry.id, mode);
        let completed = match mode {
            ChainMode::FirstSuccess => self.walk_first_success(chain, entry, &mut report, cancel).await,
            ChainMode::Exhaustive => self.walk_exhaustive(chain, entry, &mut report, cancel).await,
        };

        if !completed {
            tracing::info!(run_id = %run_id, "Source chain cancelled");
            self.events.emit_lossy(ChainEvent::ChainCancelled {
                run_id,
                timestamp: Utc::now(),
            });
            return Ok(ChainOutcome::Cancelled { partial: report });
        }

        if report.results.is_empty() {
            tracing::warn!(run_id = %run_id, attempted = report.attempts.len(), "Source chain exhausted");
            self.events.emit_lossy(ChainEvent::ChainExhausted {
                run_id,
                attempted: report.attempts.len(),
                timestamp: Utc::now(),
            });
            return Ok(ChainOutcome::Exhausted {
                run_id,
                attempts: report.attempts,
            });
        }

        tracing::info!(
            run_id = %run_id,
            sources = report.results.len(),
            terminal = ?report.terminal_source(),
            "Source chain completed"
        );
        Ok(ChainOutcome::Completed(report))
    }

    /// Stop at the first source that yields fields; false if cancelled
    async fn walk_first_success(
        &self,
        chain: &SourceChain,
        entry: &CanonicalEntry,
        report: &mut ChainReport,
        cancel: &CancellationToken,
    ) -> bool {
        for source in chain.sources() {
            match self.visit(source, entry, report, cancel).await {
                Visit::Yielded(result) => {
                    report.results.push(result);
                    return true;
                }
                Visit::Nothing => {}
                Visit::Cancelled => return false,
            }
        }
        true
    }

    /// Query every eligible fetched source; false if cancelled
    async fn walk_exhaustive(
        &self,
        chain: &SourceChain,
        entry: &CanonicalEntry,
        report: &mut ChainReport,
        cancel: &CancellationToken,
    ) -> bool {
        for source in chain.sources().iter().filter(|s| !s.is_embedded()) {
            match self.visit(source, entry, report, cancel).await {
                Visit::Yielded(result) => report.results.push(result),
                Visit::Nothing => {}
                Visit::Cancelled => return false,
            }
        }
        true
    }

    async fn visit(
        &self,
        source: &Source,
        entry: &CanonicalEntry,
        report: &mut ChainReport,
        cancel: &CancellationToken,
    ) -> Visit {
        let run_id = report.run_id;

        if cancel.is_cancelled() {
            return Visit::Cancelled;
        }

        if source.tier == SourceTier::Reference && !self.settings.enable_secondary_tier {
            self.skipped(run_id, source, "secondary tier disabled");
            return Visit::Nothing;
        }

        if source.is_embedded() {
            return self.visit_embedded(source, entry, report);
        }

        let Some(target) = source.locator_for(entry) else {
            self.skipped(run_id, source, "no locator for entry");
            return Visit::Nothing;
        };

        self.events.emit_lossy(ChainEvent::SourceTrying {
            run_id,
            source_id: source.id.clone(),
            target: target.clone(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let mut retries = 0;
        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Visit::Cancelled,
                fetched = self.engine.fetch(&target, source.strategy) => fetched,
            };

            let strategy = fetched.strategy;
            let retries_so_far = retries;
            let record = |outcome: AttemptOutcome| FetchAttempt {
                source_id: source.id.clone(),
                target: target.clone(),
                outcome,
                strategy: Some(strategy),
                elapsed_ms: started.elapsed().as_millis() as u64,
                retries: retries_so_far,
            };

            match fetched.outcome {
                FetchOutcome::Content(page) => {
                    let fields = self.extract(source, &target, &page);
                    if fields.is_empty() {
                        report.attempts.push(record(AttemptOutcome::Empty));
                        let product_page = self.engine.detector().is_likely_product_page(&page.body);
                        if product_page {
                            tracing::warn!(
                                run_id = %run_id,
                                source = %source.id,
                                "Product page yielded no fields; parser may be out of date"
                            );
                        } else {
                            tracing::debug!(run_id = %run_id, source = %source.id, "Source returned no fields");
                        }
                        self.events.emit_lossy(ChainEvent::SourceEmpty {
                            run_id,
                            source_id: source.id.clone(),
                            product_page,
                            timestamp: Utc::now(),
                        });
                        return Visit::Nothing;
                    }

                    report.attempts.push(record(AttemptOutcome::Succeeded { fields: fields.len() }));
                    tracing::info!(
                        run_id = %run_id,
                        source = %source.id,
                        fields = fields.len(),
                        strategy = fetched.strategy.as_str(),
                        "Source succeeded"
                    );
                    self.events.emit_lossy(ChainEvent::SourceSuccess {
                        run_id,
                        source_id: source.id.clone(),
                        fields: fields.len(),
                        strategy: fetched.strategy.as_str().to_string(),
                        timestamp: Utc::now(),
                    });
                    return Visit::Yielded(SourceResult {
                        source_id: source.id.clone(),
                        priority: source.priority,
                        tier: source.tier,
                        locator: locator_of(&target, &page),
                        fields,
                    });
                }
                FetchOutcome::Blocked { reason, severity } => {
                    if let Some(host) = host_of(&target) {
                        self.engine.blocked_domains().insert(&host);
                    }
                    tracing::debug!(run_id = %run_id, source = %source.id, severity = ?severity, "Source blocked");
                    report.attempts.push(record(AttemptOutcome::Blocked {
                        reason: reason.clone(),
                        severity,
                    }));
                    self.failed(run_id, source, &reason);
                    return Visit::Nothing;
                }
                FetchOutcome::TransportError { kind } => {
                    if kind.is_retryable() && retries < self.settings.max_retries_per_source {
                        retries += 1;
                        tracing::debug!(
                            run_id = %run_id,
                            source = %source.id,
                            retry = retries,
                            error = %kind,
                            "Retrying source after transport error"
                        );
                        continue;
                    }
                    let reason = kind.to_string();
                    report.attempts.push(record(AttemptOutcome::Errored { error: kind }));
                    self.failed(run_id, source, &reason);
                    return Visit::Nothing;
                }
            }
        }
    }

    /// Validated specs stored on the entry
    fn visit_embedded(&self, source: &Source, entry: &CanonicalEntry, report: &mut ChainReport) -> Visit {
        let run_id = report.run_id;
        let locator = format!("catalog:{}", entry.id);

        self.events.emit_lossy(ChainEvent::SourceTrying {
            run_id,
            source_id: source.id.clone(),
            target: locator.clone(),
            timestamp: Utc::now(),
        });

        let fields: Vec<SpecField> = entry
            .validated_specs()
            .filter_map(|(key, spec)| {
                let value = match &spec.unit {
                    Some(unit) => format!("{}{}", spec.value, unit),
                    None => spec.value.clone(),
                };
                SpecField::sourced(
                    key,
                    value,
                    source.tier.extracted_status(),
                    source.tier,
                    &source.id,
                    &locator,
                    spec.confidence.clamp(0.0, 1.0),
                )
                .ok()
            })
            .collect();

        let outcome = if fields.is_empty() {
            AttemptOutcome::Empty
        } else {
            AttemptOutcome::Succeeded { fields: fields.len() }
        };
        report.attempts.push(FetchAttempt {
            source_id: source.id.clone(),
            target: locator.clone(),
            outcome,
            strategy: None,
            elapsed_ms: 0,
            retries: 0,
        });

        if fields.is_empty() {
            self.events.emit_lossy(ChainEvent::SourceEmpty {
                run_id,
                source_id: source.id.clone(),
                product_page: false,
                timestamp: Utc::now(),
            });
            return Visit::Nothing;
        }

        self.events.emit_lossy(ChainEvent::SourceSuccess {
            run_id,
            source_id: source.id.clone(),
            fields: fields.len(),
            strategy: "embedded".to_string(),
            timestamp: Utc::now(),
        });
        Visit::Yielded(SourceResult {
            source_id: source.id.clone(),
            priority: source.priority,
            tier: source.tier,
            locator,
            fields,
        })
    }

    /// Parse a page and attach provenance
    fn extract(&self, source: &Source, target: &str, page: &Page) -> Vec<SpecField> {
        let Some(parser) = self.parsers.get(&source.parser) else {
            tracing::warn!(source = %source.id, parser = %source.parser, "No parser registered");
            return Vec::new();
        };

        let locator = locator_of(target, page);
        let prefix = source.category.as_str().to_lowercase();

        parser
            .parse(&page.body, &locator)
            .into_iter()
            .filter_map(|(key, value)| {
                let key = if key.contains('.') {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                match SpecField::sourced(
                    key,
                    value,
                    source.tier.extracted_status(),
                    source.tier,
                    &source.id,
                    &locator,
                    source.tier.base_confidence(),
                ) {
                    Ok(field) => Some(field),
                    Err(e) => {
                        tracing::warn!(source = %source.id, error = %e, "Dropping invalid field");
                        None
                    }
                }
            })
            .collect()
    }

    fn skipped(&self, run_id: Uuid, source: &Source, reason: &str) {
        tracing::debug!(run_id = %run_id, source = %source.id, reason, "Source skipped");
        self.events.emit_lossy(ChainEvent::SourceSkipped {
            run_id,
            source_id: source.id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn failed(&self, run_id: Uuid, source: &Source, reason: &str) {
        tracing::warn!(run_id = %run_id, source = %source.id, reason, "Source failed");
        self.events.emit_lossy(ChainEvent::SourceFailed {
            run_id,
            source_id: source.id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Locator recorded on fields: the final URL after redirects when known
fn locator_of(target: &str, page: &Page) -> String {
    if page.final_url.trim().is_empty() {
        target.to_string()
    } else {
        page.final_url.clone()
    }
}
