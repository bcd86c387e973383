//! Shared test fixtures: scripted fetchers, a key=value parser, and an
//! in-memory pipeline wired around them

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hwx_common::config::{ChainMode, EngineConfig};
use hwx_common::events::EventBus;
use hwx_engine::cache::FingerprintCache;
use hwx_engine::catalog::{CatalogStore, SqliteCatalog};
use hwx_engine::chain::{ChainSettings, SourceChain, SourceChainManager};
use hwx_engine::collaborators::{PageParser, ParserRegistry};
use hwx_engine::db::init_memory_pool;
use hwx_engine::fetch::blocklist::BlockedDomainSet;
use hwx_engine::fetch::{FetchEngine, FetchOutcome, FetchStrategy, Page, PageFetcher, TransportErrorKind};
use hwx_engine::spec_table::SPEC_TABLE_PARSER;
use hwx_engine::types::{CanonicalEntry, RawFields};
use hwx_engine::validator::CrossValidator;
use hwx_engine::Pipeline;

/// Test hosts accepted by the fetch engine
pub const TEST_DOMAINS: [&str; 4] = ["a.test", "b.test", "c.test", "d.test"];

/// Scripted response for a URL
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with a body
    Body(String),
    /// Any status with a body
    Status(u16, String),
    /// Transport failure
    Error(TransportErrorKind),
    /// Never answers within any sane timeout
    Hang,
}

impl Reply {
    /// Page body holding `key=value` lines
    pub fn fields(pairs: &[(&str, &str)]) -> Self {
        let body = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        Self::Body(body)
    }

    pub fn forbidden() -> Self {
        Self::Status(403, "<html><body>Forbidden</body></html>".to_string())
    }
}

/// Fetcher answering from a per-URL script and recording every call
pub struct ScriptedFetcher {
    strategy: FetchStrategy,
    replies: Mutex<HashMap<String, Vec<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new(strategy: FetchStrategy) -> Arc<Self> {
        Arc::new(Self {
            strategy,
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Reply for `url`; the last scripted reply repeats
    pub fn reply(&self, url: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(reply);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }

    fn next_reply(&self, url: &str) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(url)?;
        if queue.len() > 1 {
            Some(queue.remove(0))
        } else {
            queue.first().cloned()
        }
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    fn strategy(&self) -> FetchStrategy {
        self.strategy
    }

    async fn fetch(&self, target: &str, _timeout: Duration) -> FetchOutcome {
        self.calls.lock().unwrap().push(target.to_string());

        let page = |status: u16, body: String| {
            FetchOutcome::Content(Page {
                body,
                status: Some(status),
                final_url: target.to_string(),
            })
        };

        match self.next_reply(target) {
            Some(Reply::Body(body)) => page(200, body),
            Some(Reply::Status(status, body)) => page(status, body),
            Some(Reply::Error(kind)) => FetchOutcome::TransportError { kind },
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                page(200, String::new())
            }
            None => FetchOutcome::TransportError {
                kind: TransportErrorKind::Status(404),
            },
        }
    }
}

/// Parses `key=value` lines
pub struct KeyValueParser;

impl PageParser for KeyValueParser {
    fn parse(&self, content: &str, _locator: &str) -> RawFields {
        content
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect()
    }
}

pub fn parsers() -> ParserRegistry {
    let mut registry = ParserRegistry::new();
    registry.register(SPEC_TABLE_PARSER, Arc::new(KeyValueParser));
    registry
}

/// Engine config with a short fetch timeout and no throttling
pub fn test_config() -> EngineConfig {
    EngineConfig {
        fetch_timeout_ms: 200,
        max_retries_per_source: 0,
        ..EngineConfig::default()
    }
}

/// Light and heavy fetchers plus the engine built around them
pub struct Fetchers {
    pub light: Arc<ScriptedFetcher>,
    pub heavy: Arc<ScriptedFetcher>,
    pub engine: FetchEngine,
}

pub fn fetchers(config: &EngineConfig) -> Fetchers {
    let light = ScriptedFetcher::new(FetchStrategy::Lightweight);
    let heavy = ScriptedFetcher::new(FetchStrategy::Heavyweight);
    let engine = FetchEngine::new(light.clone(), heavy.clone(), BlockedDomainSet::new(), config)
        .with_extra_domains(TEST_DOMAINS);
    Fetchers { light, heavy, engine }
}

pub fn manager(engine: FetchEngine, chain: SourceChain, settings: ChainSettings) -> SourceChainManager {
    SourceChainManager::new(engine, parsers(), EventBus::default(), settings).with_chain(chain)
}

/// In-memory pipeline over a catalog seeded with `entries`
pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub catalog: SqliteCatalog,
    pub fetchers: Fetchers,
    pub events: EventBus,
}

pub async fn pipeline(
    chain: SourceChain,
    entries: &[CanonicalEntry],
    config: &EngineConfig,
    mode: ChainMode,
) -> TestPipeline {
    let pool = init_memory_pool().await.unwrap();
    let catalog = SqliteCatalog::new(pool.clone());
    for entry in entries {
        catalog.upsert(entry).await.unwrap();
    }
    let cache = FingerprintCache::new(pool, 3600);

    let fetchers = fetchers(config);
    let events = EventBus::default();
    let manager = SourceChainManager::new(
        fetchers.engine.clone(),
        parsers(),
        events.clone(),
        ChainSettings::from(config),
    )
    .with_chain(chain);

    let pipeline = Pipeline::new(
        catalog.clone(),
        cache,
        manager,
        CrossValidator::new(config),
        mode,
    );

    TestPipeline {
        pipeline,
        catalog,
        fetchers,
        events,
    }
}
