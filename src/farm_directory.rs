use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::models::FarmRef;

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Telemetry arrived for a serial number no farm owns. A data-quality
    /// signal, not a crash condition: the dispatcher drops the message.
    #[error("no farm registered for serial number {0:?}")]
    FarmNotFound(String),
    #[error("farm lookup failed")]
    Lookup(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
struct CachedFarm {
    farm: FarmRef,
    fetched_at: DateTime<Utc>,
}

/// Read-mostly resolver from device serial number to farm identity.
///
/// Telemetry can arrive every few seconds per device, so successful
/// lookups are cached with a short TTL rather than hitting Postgres on
/// every event. Invalidation is purely time-based; the control loop does
/// not need strong consistency on farm metadata.
#[derive(Clone)]
pub struct FarmDirectory {
    pool: PgPool,
    ttl: chrono::Duration,
    cache: Arc<RwLock<HashMap<String, CachedFarm>>>,
}

impl FarmDirectory {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self {
            pool,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30)),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Resolve `serial_number` to its farm, consulting the cache first.
    pub async fn resolve(&self, serial_number: &str) -> Result<FarmRef, DirectoryError> {
        let now = Utc::now();

        if let Some(cached) = self.cache.read().await.get(serial_number) {
            if now - cached.fetched_at < self.ttl {
                return Ok(cached.farm.clone());
            }
        }

        let farm = self.fetch(serial_number).await?;
        debug!(serial_number = %serial_number, farm_id = %farm.id, "Farm lookup cached");
        self.cache.write().await.insert(
            serial_number.to_owned(),
            CachedFarm { farm: farm.clone(), fetched_at: now },
        );
        Ok(farm)
    }

    async fn fetch(&self, serial_number: &str) -> Result<FarmRef, DirectoryError> {
        let farm = sqlx::query_as::<_, FarmRef>(
            "SELECT id, serial_number, is_disabled FROM farms WHERE serial_number = $1",
        )
        .bind(serial_number)
        .fetch_optional(&self.pool)
        .await?;

        farm.ok_or_else(|| DirectoryError::FarmNotFound(serial_number.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn insert_farm(pool: &PgPool, serial: &str) -> uuid::Uuid {
        sqlx::query_scalar::<_, uuid::Uuid>(
            "INSERT INTO farms (serial_number, name, farm_type) \
             VALUES ($1, 'Test Farm', 'hydroponic') RETURNING id",
        )
        .bind(serial)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn resolves_registered_farm(pool: PgPool) {
        let id = insert_farm(&pool, "F1").await;
        let dir = FarmDirectory::new(pool, Duration::from_secs(30));

        let farm = dir.resolve("F1").await.unwrap();
        assert_eq!(farm.id, id);
        assert_eq!(farm.serial_number, "F1");
        assert!(!farm.is_disabled);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unknown_serial_yields_farm_not_found(pool: PgPool) {
        let dir = FarmDirectory::new(pool, Duration::from_secs(30));
        let err = dir.resolve("does-not-exist").await.unwrap_err();
        assert!(matches!(err, DirectoryError::FarmNotFound(sn) if sn == "does-not-exist"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn fresh_cache_entry_skips_the_database(pool: PgPool) {
        insert_farm(&pool, "F1").await;
        let dir = FarmDirectory::new(pool.clone(), Duration::from_secs(60));

        let first = dir.resolve("F1").await.unwrap();

        // Remove the row; a cached resolve must still succeed within TTL.
        sqlx::query("DELETE FROM farms WHERE serial_number = 'F1'")
            .execute(&pool)
            .await
            .unwrap();

        let second = dir.resolve("F1").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn expired_cache_entry_is_refetched(pool: PgPool) {
        insert_farm(&pool, "F1").await;
        let dir = FarmDirectory::new(pool.clone(), Duration::from_secs(0));

        dir.resolve("F1").await.unwrap();

        sqlx::query("DELETE FROM farms WHERE serial_number = 'F1'")
            .execute(&pool)
            .await
            .unwrap();

        // TTL of zero means the cache entry is already stale.
        let err = dir.resolve("F1").await.unwrap_err();
        assert!(matches!(err, DirectoryError::FarmNotFound(_)));
    }
}
