//! Database access for hwx-engine
//!
//! One SQLite file under the root folder holds both the catalog and the
//! fingerprint cache.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

use crate::error::EngineResult;

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "hwx.db";

/// Initialize database connection pool
///
/// Creates the parent directory and the schema if missing.
pub async fn init_database_pool(db_path: &Path) -> EngineResult<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests and dry runs
///
/// Limited to one connection: every SQLite `:memory:` connection is a
/// separate database.
pub async fn init_memory_pool() -> EngineResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create catalog and cache tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> EngineResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL,
            brand TEXT NOT NULL,
            model TEXT NOT NULL,
            part_number TEXT,
            ean TEXT,
            locators TEXT NOT NULL DEFAULT '{}',
            specs TEXT NOT NULL DEFAULT '{}',
            validated INTEGER NOT NULL DEFAULT 0,
            provenance TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_catalog_category ON catalog_entries(category, seq)",
    )
    .execute(pool)
    .await?;

    // Single-row counter bumped on every catalog write
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_revision (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            revision INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO catalog_revision (id, revision) VALUES (1, 0)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fingerprint_cache (
            namespace TEXT NOT NULL,
            cache_key TEXT NOT NULL,
            payload TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, cache_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (catalog_entries, catalog_revision, fingerprint_cache)");

    Ok(())
}
