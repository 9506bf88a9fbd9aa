use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A farm as seen by the control loop: just enough to resolve a device
/// serial number. Full farm lifecycle lives in the CRUD service.
#[derive(Debug, Clone, FromRow)]
pub struct FarmRef {
    pub id: Uuid,
    pub serial_number: String,
    pub is_disabled: bool,
}

/// The most recent telemetry snapshot persisted for one farm.
/// One row per serial number, overwritten on every event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LatestReading {
    pub serial_number: String,
    pub farm_id: Uuid,
    pub paired: bool,
    /// Tank water temperature, °C
    pub water_temperature: f64,
    /// Ambient temperature, °C
    pub environment_temperature: f64,
    /// ppm
    pub co2: f64,
    pub light_level: f64,
    /// Relative humidity, %
    pub humidity: f64,
    pub water_level: f64,
    pub ph: f64,
    /// µS/cm
    pub electrical_conductivity: f64,
    pub received_at: DateTime<Utc>,
}
