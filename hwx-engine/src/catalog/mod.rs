//! Catalog of canonical component entries
//!
//! Entries are never deleted, only superseded by re-validation. Every write
//! bumps the catalog revision, which keys resolution caching.

mod sqlite;
mod writer;

pub use sqlite::{SeedEntry, SqliteCatalog};
pub use writer::{CatalogWriter, PersistReport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EngineResult;
use crate::types::{CanonicalEntry, ComponentCategory};

/// Per-category catalog statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub entries: u64,
    pub validated_entries: u64,
    pub stored_specs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub revision: i64,
    pub categories: BTreeMap<ComponentCategory, CategoryStats>,
}

impl CatalogStats {
    pub fn total_entries(&self) -> u64 {
        self.categories.values().map(|s| s.entries).sum()
    }
}

/// Read/write access to catalog entries
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Entries of a category in insertion order
    async fn load_by_category(&self, category: ComponentCategory) -> EngineResult<Vec<CanonicalEntry>>;

    async fn get(&self, id: &str) -> EngineResult<Option<CanonicalEntry>>;

    /// Insert or replace an entry by id, keeping its original insertion order
    async fn upsert(&self, entry: &CanonicalEntry) -> EngineResult<CanonicalEntry>;

    /// Monotonic counter bumped on every write
    async fn revision(&self) -> EngineResult<i64>;

    async fn stats(&self) -> EngineResult<CatalogStats>;
}
