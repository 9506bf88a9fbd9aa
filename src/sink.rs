use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::{codec::Reading, db::models::FarmRef};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to persist reading")]
    Write(#[from] sqlx::Error),
}

/// Best-effort persistence of telemetry. Actuation never waits on this:
/// a failed or slow write costs one data point, not a control cycle.
#[derive(Clone)]
pub struct ReadingSink {
    pool: PgPool,
    persist_history: bool,
}

impl ReadingSink {
    pub fn new(pool: PgPool, persist_history: bool) -> Self {
        Self { pool, persist_history }
    }

    /// Upsert the farm's latest reading, keyed by serial number, and
    /// append to history when enabled. Idempotent for the upsert; a
    /// redelivered event merely rewrites the same row.
    pub async fn upsert_latest(&self, farm: &FarmRef, reading: &Reading) -> Result<(), StorageError> {
        self.write_latest(farm.id, reading).await?;
        if self.persist_history {
            self.append_history(farm.id, reading).await?;
        }
        Ok(())
    }

    async fn write_latest(&self, farm_id: Uuid, reading: &Reading) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO latest_readings (
                serial_number, farm_id, paired,
                water_temperature, environment_temperature, co2, light_level,
                humidity, water_level, ph, electrical_conductivity, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (serial_number) DO UPDATE SET
                farm_id                 = EXCLUDED.farm_id,
                paired                  = EXCLUDED.paired,
                water_temperature       = EXCLUDED.water_temperature,
                environment_temperature = EXCLUDED.environment_temperature,
                co2                     = EXCLUDED.co2,
                light_level             = EXCLUDED.light_level,
                humidity                = EXCLUDED.humidity,
                water_level             = EXCLUDED.water_level,
                ph                      = EXCLUDED.ph,
                electrical_conductivity = EXCLUDED.electrical_conductivity,
                received_at             = EXCLUDED.received_at
            "#,
        )
        .bind(&reading.serial_number)
        .bind(farm_id)
        .bind(reading.paired)
        .bind(reading.water_temperature)
        .bind(reading.environment_temperature)
        .bind(reading.co2)
        .bind(reading.light_level)
        .bind(reading.humidity)
        .bind(reading.water_level)
        .bind(reading.ph)
        .bind(reading.electrical_conductivity)
        .bind(reading.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_history(&self, farm_id: Uuid, reading: &Reading) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO reading_history (
                serial_number, farm_id, paired,
                water_temperature, environment_temperature, co2, light_level,
                humidity, water_level, ph, electrical_conductivity, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&reading.serial_number)
        .bind(farm_id)
        .bind(reading.paired)
        .bind(reading.water_temperature)
        .bind(reading.environment_temperature)
        .bind(reading.co2)
        .bind(reading.light_level)
        .bind(reading.humidity)
        .bind(reading.water_level)
        .bind(reading.ph)
        .bind(reading.electrical_conductivity)
        .bind(reading.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
