//! SQLite catalog store

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;

use super::{CatalogStats, CatalogStore, CategoryStats};
use crate::error::{EngineError, EngineResult};
use crate::types::{CanonicalEntry, ComponentCategory, Provenance, StoredSpec};

const SELECT_ENTRY: &str = r#"
    SELECT seq, id, category, brand, model, part_number, ean,
           locators, specs, validated, provenance
    FROM catalog_entries
"#;

#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

/// Manually curated entry in a seed file
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    pub category: ComponentCategory,
    pub brand: String,
    pub model: String,
    #[serde(default)]
    pub part_number: Option<String>,
    #[serde(default)]
    pub ean: Option<String>,
    #[serde(default)]
    pub locators: BTreeMap<String, String>,
    #[serde(default)]
    pub specs: BTreeMap<String, StoredSpec>,
}

impl From<SeedEntry> for CanonicalEntry {
    fn from(seed: SeedEntry) -> Self {
        let mut entry = CanonicalEntry::new(seed.category, seed.brand, seed.model, seed.part_number);
        entry.ean = seed.ean;
        entry.locators = seed.locators;
        entry.validated = seed.specs.values().any(|s| s.validated);
        entry.specs = seed.specs;
        entry
    }
}

impl SqliteCatalog {
    /// Catalog over an initialized pool (see [`crate::db::init_database_pool`])
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load entries from a JSON array of [`SeedEntry`] objects
    ///
    /// Returns the number of entries written.
    pub async fn seed_from_json(&self, path: &Path) -> EngineResult<usize> {
        let text = tokio::fs::read_to_string(path).await?;
        let seeds: Vec<SeedEntry> = serde_json::from_str(&text)?;

        let count = seeds.len();
        for seed in seeds {
            self.upsert(&seed.into()).await?;
        }

        tracing::info!(path = %path.display(), count, "Catalog seeded");
        Ok(count)
    }
}

/// Entry by id on an open connection or transaction
pub(crate) async fn get_on(conn: &mut SqliteConnection, id: &str) -> EngineResult<Option<CanonicalEntry>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_ENTRY))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| entry_from_row(&r)).transpose()
}

/// Upsert on an open connection or transaction; bumps the revision
pub(crate) async fn upsert_on(conn: &mut SqliteConnection, entry: &CanonicalEntry) -> EngineResult<CanonicalEntry> {
    let locators = serde_json::to_string(&entry.locators)?;
    let specs = serde_json::to_string(&entry.specs)?;
    let provenance = serde_json::to_string(&entry.provenance)?;

    sqlx::query(
        r#"
        INSERT INTO catalog_entries
            (id, category, brand, model, part_number, ean, locators, specs, validated, provenance, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            category = excluded.category,
            brand = excluded.brand,
            model = excluded.model,
            part_number = excluded.part_number,
            ean = excluded.ean,
            locators = excluded.locators,
            specs = excluded.specs,
            validated = excluded.validated,
            provenance = excluded.provenance,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&entry.id)
    .bind(entry.category.as_str())
    .bind(&entry.brand)
    .bind(&entry.model)
    .bind(&entry.part_number)
    .bind(&entry.ean)
    .bind(locators)
    .bind(specs)
    .bind(entry.validated)
    .bind(provenance)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    sqlx::query("UPDATE catalog_revision SET revision = revision + 1 WHERE id = 1")
        .execute(&mut *conn)
        .await?;

    let (seq,): (i64,) = sqlx::query_as("SELECT seq FROM catalog_entries WHERE id = ?")
        .bind(&entry.id)
        .fetch_one(&mut *conn)
        .await?;

    let mut stored = entry.clone();
    stored.seq = seq;
    Ok(stored)
}

fn entry_from_row(row: &SqliteRow) -> EngineResult<CanonicalEntry> {
    let category: String = row.try_get("category")?;
    let locators: String = row.try_get("locators")?;
    let specs: String = row.try_get("specs")?;
    let provenance: String = row.try_get("provenance")?;

    Ok(CanonicalEntry {
        id: row.try_get("id")?,
        category: category.parse::<ComponentCategory>()?,
        brand: row.try_get("brand")?,
        model: row.try_get("model")?,
        part_number: row.try_get("part_number")?,
        ean: row.try_get("ean")?,
        locators: serde_json::from_str(&locators)?,
        specs: serde_json::from_str(&specs)?,
        validated: row.try_get("validated")?,
        provenance: serde_json::from_str::<Provenance>(&provenance)?,
        seq: row.try_get("seq")?,
    })
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn load_by_category(&self, category: ComponentCategory) -> EngineResult<Vec<CanonicalEntry>> {
        let rows = sqlx::query(&format!("{} WHERE category = ? ORDER BY seq", SELECT_ENTRY))
            .bind(category.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn get(&self, id: &str) -> EngineResult<Option<CanonicalEntry>> {
        let mut conn = self.pool.acquire().await?;
        get_on(&mut conn, id).await
    }

    async fn upsert(&self, entry: &CanonicalEntry) -> EngineResult<CanonicalEntry> {
        if entry.id.trim().is_empty() {
            return Err(EngineError::Config("catalog entry without id".to_string()));
        }
        let mut tx = self.pool.begin().await?;
        let stored = upsert_on(&mut tx, entry).await?;
        tx.commit().await?;
        tracing::debug!(id = %stored.id, seq = stored.seq, "Catalog entry upserted");
        Ok(stored)
    }

    async fn revision(&self) -> EngineResult<i64> {
        let (revision,): (i64,) = sqlx::query_as("SELECT revision FROM catalog_revision WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(revision)
    }

    async fn stats(&self) -> EngineResult<CatalogStats> {
        let rows = sqlx::query("SELECT category, validated, specs FROM catalog_entries")
            .fetch_all(&self.pool)
            .await?;

        let mut categories: BTreeMap<ComponentCategory, CategoryStats> = BTreeMap::new();
        for row in &rows {
            let category: String = row.try_get("category")?;
            let validated: bool = row.try_get("validated")?;
            let specs: String = row.try_get("specs")?;
            let specs: BTreeMap<String, StoredSpec> = serde_json::from_str(&specs)?;

            let stats = categories.entry(category.parse()?).or_default();
            stats.entries += 1;
            stats.stored_specs += specs.len() as u64;
            if validated {
                stats.validated_entries += 1;
            }
        }

        Ok(CatalogStats {
            revision: self.revision().await?,
            categories,
        })
    }
}
