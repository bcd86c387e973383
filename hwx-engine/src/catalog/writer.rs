//! Persists cross-validated specs into the catalog
//!
//! Only keys that reached consensus in the current run are written. Writes
//! for one canonical id are serialized and each runs in one transaction, so
//! two chain runs finishing together cannot lose each other's keys.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::sqlite::{get_on, upsert_on};
use super::SqliteCatalog;
use crate::error::EngineResult;
use crate::types::{CanonicalEntry, StoredSpec};
use crate::validator::{ConsensusResult, KeyConsensus};

/// What a persist call changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersistReport {
    /// Keys written as validated
    pub written_keys: Vec<String>,
    /// Provenance sources of the entry after the merge
    pub validation_sources: Vec<String>,
}

#[derive(Clone)]
pub struct CatalogWriter {
    catalog: SqliteCatalog,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CatalogWriter {
    pub fn new(catalog: SqliteCatalog) -> Self {
        Self {
            catalog,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Merge agreed keys into the stored entry
    ///
    /// `entry` is used as the base when the catalog has no row for its id
    /// yet (URL-resolved entries). Returns `None` when nothing reached
    /// consensus; the catalog is then left untouched.
    pub async fn persist(
        &self,
        entry: &CanonicalEntry,
        consensus: &ConsensusResult,
    ) -> EngineResult<Option<PersistReport>> {
        if !consensus.has_agreement() {
            tracing::debug!(id = %entry.id, "No agreed keys, catalog unchanged");
            return Ok(None);
        }

        let lock = self.lock_for(&entry.id);
        let _guard = lock.lock().await;

        let mut tx = self.catalog.pool().begin().await?;
        let current = get_on(&mut tx, &entry.id).await?;
        let mut merged = current.unwrap_or_else(|| entry.clone());

        let written_keys = merge_agreed(&mut merged, consensus);
        let stored = upsert_on(&mut tx, &merged).await?;
        tx.commit().await?;

        tracing::info!(
            id = %stored.id,
            keys = written_keys.len(),
            sources = ?stored.provenance.validation_sources,
            "Validated specs persisted"
        );

        Ok(Some(PersistReport {
            written_keys,
            validation_sources: stored.provenance.validation_sources,
        }))
    }
}

/// Apply agreed keys to `entry`; other stored keys are preserved
fn merge_agreed(entry: &mut CanonicalEntry, consensus: &ConsensusResult) -> Vec<String> {
    let mut written = Vec::new();

    for (key, outcome) in consensus.agreed() {
        if let KeyConsensus::Agreed {
            value,
            unit,
            sources,
            confidence,
        } = outcome
        {
            entry.specs.insert(
                key.clone(),
                StoredSpec {
                    value: value.clone(),
                    unit: unit.clone(),
                    sources: sources.clone(),
                    confidence: *confidence,
                    validated: true,
                },
            );
            written.push(key.clone());
        }
    }

    for source in consensus.validation_sources() {
        if !entry.provenance.validation_sources.contains(&source) {
            entry.provenance.validation_sources.push(source);
        }
    }

    let validated: Vec<f64> = entry.validated_specs().map(|(_, s)| s.confidence).collect();
    if !validated.is_empty() {
        entry.provenance.confidence = validated.iter().sum::<f64>() / validated.len() as f64;
    }
    entry.provenance.last_updated = Utc::now();
    entry.validated = true;

    written
}
