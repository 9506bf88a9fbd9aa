use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Latest telemetry snapshot for one farm, as served to the CRUD layer.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LatestReadingDto {
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

impl From<crate::db::models::LatestReading> for LatestReadingDto {
    fn from(r: crate::db::models::LatestReading) -> Self {
        Self {
            serial_number: r.serial_number,
            farm_id: r.farm_id,
            paired: r.paired,
            water_temperature: r.water_temperature,
            environment_temperature: r.environment_temperature,
            co2: r.co2,
            light_level: r.light_level,
            humidity: r.humidity,
            water_level: r.water_level,
            ph: r.ph,
            electrical_conductivity: r.electrical_conductivity,
            received_at: r.received_at,
        }
    }
}
