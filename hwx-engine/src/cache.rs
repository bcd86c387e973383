//! Local fingerprint cache
//!
//! SQLite-backed TTL cache with two namespaces: resolutions keyed by an
//! input fingerprint and spec lists keyed by canonical id. Expired rows are
//! invisible to reads and removed by [`FingerprintCache::purge_expired`].

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::error::EngineResult;

/// Cache namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    /// Input fingerprint → resolution
    Inputs,
    /// Canonical id → spec fields
    Specs,
}

impl CacheNamespace {
    fn as_str(self) -> &'static str {
        match self {
            Self::Inputs => "inputs",
            Self::Specs => "specs",
        }
    }
}

/// Lower-hex SHA-256 of `text`
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
pub struct FingerprintCache {
    pool: SqlitePool,
    ttl_seconds: i64,
}

impl FingerprintCache {
    /// Cache over an initialized pool (see [`crate::db::init_database_pool`])
    pub fn new(pool: SqlitePool, ttl_seconds: i64) -> Self {
        Self { pool, ttl_seconds }
    }

    /// Read a live entry; `None` if missing or expired
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> EngineResult<Option<T>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT payload FROM fingerprint_cache WHERE namespace = ? AND cache_key = ? AND expires_at > ?",
        )
        .bind(namespace.as_str())
        .bind(key)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((payload,)) => match serde_json::from_str(&payload) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    // Stale shape from an older build: treat as a miss
                    tracing::warn!(namespace = namespace.as_str(), key, error = %e, "Dropping undecodable cache entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Insert or replace an entry with the configured TTL
    pub async fn set<T: Serialize>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        value: &T,
    ) -> EngineResult<()> {
        let payload = serde_json::to_string(value)?;
        let expires_at = Utc::now().timestamp() + self.ttl_seconds;

        sqlx::query(
            r#"
            INSERT INTO fingerprint_cache (namespace, cache_key, payload, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(namespace, cache_key) DO UPDATE SET
                payload = excluded.payload,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(namespace.as_str())
        .bind(key)
        .bind(payload)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drop one entry (spec lists are invalidated after a catalog write)
    pub async fn invalidate(&self, namespace: CacheNamespace, key: &str) -> EngineResult<()> {
        sqlx::query("DELETE FROM fingerprint_cache WHERE namespace = ? AND cache_key = ?")
            .bind(namespace.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete expired rows, returning how many were removed
    pub async fn purge_expired(&self) -> EngineResult<u64> {
        let result = sqlx::query("DELETE FROM fingerprint_cache WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }
        Ok(purged)
    }
}
